//! Retrieval orchestration.
//!
//! For each (sub-)query the orchestrator walks an ordered strategy chain
//! until one yields documents, asks a rewriter once when nothing was found,
//! then unions the sub-query results and re-applies the caller scope and the
//! active-file allow-list before ranking:
//! - sub-queries run concurrently, results are consumed in input order
//! - strategy failures are recorded in the trace and do not stop the chain
//! - when every strategy failed, the last good result for the same scope is
//!   served from the fallback cache

use crate::cache::{FallbackCache, FallbackCacheKey};
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::metrics::RetrievalMetrics;
use crate::query::{is_relationship_query, token_count, QueryDecomposer};
use crate::ranking::rank_documents;
use crate::strategy::RetrievalStrategy;
use crate::types::{CrossModalEdge, RetrievalContext, RetrievalRequest, RoutingResult};
use async_trait::async_trait;
use bastion_core::types::{META_FILENAME, META_SOURCE};
use bastion_core::{CallerScope, Document};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rewrites a query that found nothing into one more likely to match.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn rewrite(&self, query: &str) -> Result<String>;
}

/// External routing/classification service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryRouter: Send + Sync {
    async fn route(&self, query: &str) -> Result<RoutingResult>;
}

/// What one strategy produced for one sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StrategyOutcome {
    Found(usize),
    Empty,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyTrace {
    pub sub_query: String,
    pub strategy: String,
    pub outcome: StrategyOutcome,
}

/// Unioned, scope-checked and ranked retrieval output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestrationResult {
    pub documents: Vec<Document>,
    pub visual_documents: Vec<Document>,
    pub cross_modal_edges: Vec<CrossModalEdge>,
    pub global_context: Option<String>,
    pub sub_queries: Vec<String>,
    pub strategies_used: Vec<String>,
    pub trace: Vec<StrategyTrace>,
    pub used_fallback_cache: bool,
}

impl OrchestrationResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.visual_documents.is_empty()
    }
}

/// Result of the chain (and possibly the corrective rerun) for one sub-query.
struct SubQueryResult {
    context: RetrievalContext,
    trace: Vec<StrategyTrace>,
    all_failed: bool,
}

/// Whether a document's source or filename is in the active-file allow-list.
///
/// Matching is case-insensitive: exact name, path suffix, or containment.
/// An empty allow-list admits everything.
pub fn matches_active_file(document: &Document, active_files: &[String]) -> bool {
    let wanted: Vec<String> = active_files
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    if wanted.is_empty() {
        return true;
    }

    [META_SOURCE, META_FILENAME]
        .iter()
        .filter_map(|key| document.metadata.get(*key).and_then(|v| v.as_str()))
        .map(str::to_lowercase)
        .any(|name| {
            wanted.iter().any(|file| {
                name == *file || name.ends_with(&format!("/{}", file)) || name.contains(file.as_str())
            })
        })
}

fn retain_active_files(context: &mut RetrievalContext, active_files: &[String]) {
    if active_files.is_empty() {
        return;
    }
    context.text_documents.retain(|d| matches_active_file(d, active_files));
    context.visual_documents.retain(|d| matches_active_file(d, active_files));
}

pub struct RetrievalOrchestrator {
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    decomposer: QueryDecomposer,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    fallback_cache: Option<Arc<FallbackCache>>,
    config: RetrievalConfig,
    metrics: Arc<RetrievalMetrics>,
}

impl RetrievalOrchestrator {
    pub fn new(strategies: Vec<Arc<dyn RetrievalStrategy>>, config: RetrievalConfig) -> Self {
        info!(
            strategies = strategies.len(),
            "Initializing retrieval orchestrator"
        );

        Self {
            strategies,
            decomposer: QueryDecomposer::new(),
            rewriter: None,
            fallback_cache: None,
            config,
            metrics: Arc::new(RetrievalMetrics::default()),
        }
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_fallback_cache(mut self, cache: Arc<FallbackCache>) -> Self {
        self.fallback_cache = Some(cache);
        self
    }

    pub fn metrics(&self) -> &RetrievalMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Whether advanced strategies should run for this request.
    pub fn advanced_needed(&self, request: &RetrievalRequest) -> bool {
        if !self.config.enable_advanced {
            return false;
        }

        request.high_uncertainty
            || request
                .routing
                .as_ref()
                .is_some_and(|r| r.complexity >= self.config.advanced_complexity_threshold)
            || is_relationship_query(&request.query)
            || token_count(&request.query) > self.config.advanced_token_threshold
    }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> OrchestrationResult {
        let start = Instant::now();

        let sub_queries = if self.config.enable_decomposition {
            self.decomposer.decompose(&request.query)
        } else {
            vec![request.query.trim().to_string()]
        };
        self.metrics
            .sub_queries
            .fetch_add(sub_queries.len() as u64, Ordering::Relaxed);

        let advanced = self.advanced_needed(request);
        debug!(sub_queries = sub_queries.len(), advanced, "Starting retrieval");

        let futures = sub_queries
            .iter()
            .map(|sub_query| self.retrieve_sub_query(request.for_query(sub_query.as_str()), advanced));
        let results = join_all(futures).await;

        let mut result = OrchestrationResult {
            sub_queries,
            ..Default::default()
        };
        let mut seen_text = HashSet::new();
        let mut seen_visual = HashSet::new();
        let mut all_failed = !results.is_empty();

        for sub in results {
            all_failed &= sub.all_failed;
            result.trace.extend(sub.trace);

            let ctx = sub.context;
            for name in ctx.strategies_used {
                if !result.strategies_used.contains(&name) {
                    result.strategies_used.push(name);
                }
            }
            result.documents.extend(
                ctx.text_documents
                    .into_iter()
                    .filter(|d| seen_text.insert(d.id.clone())),
            );
            result.visual_documents.extend(
                ctx.visual_documents
                    .into_iter()
                    .filter(|d| seen_visual.insert(d.id.clone())),
            );
            result.cross_modal_edges.extend(ctx.cross_modal_edges);
            if result.global_context.is_none() {
                result.global_context = ctx.global_context.filter(|g| !g.trim().is_empty());
            }
        }

        self.restrict_to_scope(&mut result, &request.scope);
        self.restrict_to_active_files(&mut result, &request.active_files);

        let cache_key = FallbackCacheKey::new(&request.scope, &request.active_files);
        if result.is_empty() && all_failed {
            if let Some(cache) = &self.fallback_cache {
                if let Some(cached) = cache.get(&cache_key).await {
                    warn!(
                        documents = cached.len(),
                        "All retrieval strategies failed; serving fallback cache"
                    );
                    self.metrics.fallback_cache_hits.fetch_add(1, Ordering::Relaxed);
                    result.documents = cached.as_ref().clone();
                    result.used_fallback_cache = true;
                }
            }
        }

        result.documents = rank_documents(
            std::mem::take(&mut result.documents),
            &request.query,
            self.config.enable_keyword_boost,
        );

        if !result.used_fallback_cache && !result.documents.is_empty() {
            if let Some(cache) = &self.fallback_cache {
                cache.replace(cache_key, result.documents.clone()).await;
            }
        }

        info!(
            documents = result.documents.len(),
            visual = result.visual_documents.len(),
            fallback = result.used_fallback_cache,
            latency_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        result
    }

    async fn retrieve_sub_query(&self, request: RetrievalRequest, advanced: bool) -> SubQueryResult {
        let mut result = self.run_chain(&request, advanced).await;
        if !result.context.is_empty() || !self.config.enable_corrective_retry {
            return result;
        }
        let Some(rewriter) = &self.rewriter else {
            return result;
        };

        let rewritten = match rewriter.rewrite(&request.query).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!("Query rewrite failed: {}", e);
                return result;
            }
        };

        let rewritten = rewritten.trim();
        if rewritten.is_empty() || rewritten.to_lowercase() == request.query.trim().to_lowercase() {
            debug!("Rewrite produced the same query; not retrying");
            return result;
        }

        debug!(original = %request.query, rewritten, "Retrying with corrected query");
        self.metrics.corrective_rewrites.fetch_add(1, Ordering::Relaxed);

        let retry = self.run_chain(&request.for_query(rewritten), advanced).await;
        result.trace.extend(retry.trace);
        result.all_failed &= retry.all_failed;
        result.context = retry.context;
        result
    }

    /// Walk the chain until a strategy returns text or visual documents.
    async fn run_chain(&self, request: &RetrievalRequest, advanced: bool) -> SubQueryResult {
        let mut trace = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for strategy in &self.strategies {
            let name = strategy.name().to_string();
            if (strategy.is_advanced() && !advanced) || !strategy.applies_to(request) {
                trace.push(StrategyTrace {
                    sub_query: request.query.clone(),
                    strategy: name,
                    outcome: StrategyOutcome::Skipped,
                });
                continue;
            }

            attempted += 1;
            match strategy.retrieve(request).await {
                Ok(mut context) => {
                    // Results outside the pinned files do not end the chain.
                    retain_active_files(&mut context, &request.active_files);
                    if context.is_empty() {
                        trace.push(StrategyTrace {
                            sub_query: request.query.clone(),
                            strategy: name,
                            outcome: StrategyOutcome::Empty,
                        });
                        continue;
                    }

                    debug!(strategy = %name, documents = context.document_count(), "Strategy found documents");
                    trace.push(StrategyTrace {
                        sub_query: request.query.clone(),
                        strategy: name,
                        outcome: StrategyOutcome::Found(context.document_count()),
                    });
                    return SubQueryResult {
                        context,
                        trace,
                        all_failed: false,
                    };
                }
                Err(e) => {
                    warn!(strategy = %name, "Retrieval strategy failed: {}", e);
                    self.metrics.strategy_failures.fetch_add(1, Ordering::Relaxed);
                    failed += 1;
                    trace.push(StrategyTrace {
                        sub_query: request.query.clone(),
                        strategy: name,
                        outcome: StrategyOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        SubQueryResult {
            context: RetrievalContext::default(),
            trace,
            all_failed: attempted > 0 && failed == attempted,
        }
    }

    fn restrict_to_scope(&self, result: &mut OrchestrationResult, scope: &CallerScope) {
        let before = result.documents.len() + result.visual_documents.len();
        result.documents.retain(|d| d.in_scope(scope));
        result.visual_documents.retain(|d| d.in_scope(scope));
        let dropped = before - result.documents.len() - result.visual_documents.len();

        if dropped > 0 {
            warn!(dropped, department = %scope.department, "Dropped out-of-scope documents");
            self.metrics
                .out_of_scope_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    fn restrict_to_active_files(&self, result: &mut OrchestrationResult, active_files: &[String]) {
        if active_files.is_empty() {
            return;
        }
        result.documents.retain(|d| matches_active_file(d, active_files));
        result.visual_documents.retain(|d| matches_active_file(d, active_files));
    }
}
