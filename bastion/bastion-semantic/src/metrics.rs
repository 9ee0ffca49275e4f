//! Atomic counters owned by the orchestrator and the pipeline.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Retrieval counters, owned by one `RetrievalOrchestrator`.
#[derive(Debug, Default)]
pub struct RetrievalMetrics {
    pub sub_queries: AtomicU64,
    pub strategy_failures: AtomicU64,
    pub corrective_rewrites: AtomicU64,
    pub fallback_cache_hits: AtomicU64,
    pub out_of_scope_dropped: AtomicU64,
}

impl RetrievalMetrics {
    pub fn strategy_failures(&self) -> u64 {
        self.strategy_failures.load(Ordering::Relaxed)
    }

    pub fn corrective_rewrites(&self) -> u64 {
        self.corrective_rewrites.load(Ordering::Relaxed)
    }

    pub fn fallback_cache_hits(&self) -> u64 {
        self.fallback_cache_hits.load(Ordering::Relaxed)
    }

    pub fn out_of_scope_dropped(&self) -> u64 {
        self.out_of_scope_dropped.load(Ordering::Relaxed)
    }
}

/// Request counters, owned by one `AnswerPipeline`.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    queries: AtomicU64,
    total_latency_ms: AtomicU64,
    abstentions: AtomicU64,
    internal_errors: AtomicU64,
    generation_timeouts: AtomicU64,
    generation_failures: AtomicU64,
    hallucination_retries: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub queries: u64,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
    pub abstentions: u64,
    pub internal_errors: u64,
    pub generation_timeouts: u64,
    pub generation_failures: u64,
    pub hallucination_retries: u64,
}

impl PipelineMetrics {
    pub fn record_query(&self, latency_ms: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_abstention(&self) {
        self.abstentions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_timeout(&self) {
        self.generation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hallucination_retry(&self) {
        self.hallucination_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn abstentions(&self) -> u64 {
        self.abstentions.load(Ordering::Relaxed)
    }

    pub fn hallucination_retries(&self) -> u64 {
        self.hallucination_retries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        PipelineMetricsSnapshot {
            queries,
            total_latency_ms,
            average_latency_ms: if queries == 0 {
                0.0
            } else {
                total_latency_ms as f64 / queries as f64
            },
            abstentions: self.abstentions.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            generation_timeouts: self.generation_timeouts.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            hallucination_retries: self.hallucination_retries.load(Ordering::Relaxed),
        }
    }
}
