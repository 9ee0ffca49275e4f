//! Question answering: route, retrieve, assemble, generate, gate.

use crate::cache::FallbackCache;
use crate::config::BastionConfig;
use crate::context::{AssembledContext, ContextAssembler};
use crate::error::{Result, SemanticError};
use crate::gate::{AnswerGate, GateOutcome, HallucinationDetector, NO_RECORDS_SENTINEL};
use crate::generation::{
    build_user_prompt, generate_with_timeout, GenerationResult, OpenAIChatGenerator, TextGenerator,
    SYSTEM_PROMPT, TIMEOUT_PLACEHOLDER,
};
use crate::metrics::{PipelineMetrics, RetrievalMetrics};
use crate::orchestration::{OrchestrationResult, QueryRewriter, QueryRouter, RetrievalOrchestrator};
use crate::store::DocumentStore;
use crate::strategy::{standard_chain, AdvancedRetriever, RetrievalStrategy};
use crate::types::{HallucinationResult, RetrievalRequest, RoutingResult};
use bastion_core::{BastionError, CallerScope};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Response returned when a request fails for any internal reason.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while answering your question.";

/// One ranked document that informed the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub rank: usize,
    pub document_id: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnswerMetrics {
    pub latency_ms: u64,
    pub documents_retrieved: usize,
    pub routing_decision: Option<String>,
    pub routing_confidence: Option<f64>,
    pub answerable: bool,
    pub citation_count: usize,
    pub gate_applied: bool,
    pub strategies_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedAnswer {
    pub answer: String,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub sources: Vec<String>,
    pub metrics: AnswerMetrics,
}

impl EnhancedAnswer {
    fn with_message(message: &str) -> Self {
        Self {
            answer: message.to_string(),
            reasoning_steps: Vec::new(),
            sources: Vec::new(),
            metrics: AnswerMetrics::default(),
        }
    }
}

/// One retrieve-assemble-generate-gate pass.
struct Attempt {
    retrieval: OrchestrationResult,
    context: AssembledContext,
    outcome: GateOutcome,
    /// The response came from the generator rather than a fallback.
    generated: bool,
}

/// Answers questions for a caller scope over one document store.
pub struct AnswerPipeline {
    orchestrator: Arc<RetrievalOrchestrator>,
    assembler: ContextAssembler,
    gate: AnswerGate,
    generator: Option<Arc<dyn TextGenerator>>,
    router: Option<Arc<dyn QueryRouter>>,
    detector: Option<Arc<dyn HallucinationDetector>>,
    generation_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl AnswerPipeline {
    pub fn builder(config: BastionConfig) -> AnswerPipelineBuilder {
        AnswerPipelineBuilder::new(config)
    }

    /// Standard strategy chain over `store`, with a chat generator when
    /// generation is enabled.
    pub fn from_config(config: BastionConfig, store: Arc<DocumentStore>) -> Result<Self> {
        Self::builder(config).store(store).build()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn retrieval_metrics(&self) -> &RetrievalMetrics {
        self.orchestrator.metrics()
    }

    pub fn orchestrator(&self) -> &RetrievalOrchestrator {
        &self.orchestrator
    }

    /// Answer `query` for `scope`, optionally restricted to `active_files`.
    pub async fn ask(&self, query: &str, scope: &CallerScope, active_files: &[String]) -> String {
        self.ask_enhanced(query, scope, active_files).await.answer
    }

    /// Like [`ask`](Self::ask), with the ranked evidence and per-request metrics.
    pub async fn ask_enhanced(
        &self,
        query: &str,
        scope: &CallerScope,
        active_files: &[String],
    ) -> EnhancedAnswer {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.answer(query, scope, active_files))
            .catch_unwind()
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_query(latency_ms);

        let mut answer = match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                error!("Request failed: {}", e);
                self.metrics.record_internal_error();
                EnhancedAnswer::with_message(INTERNAL_ERROR_MESSAGE)
            }
            Err(_) => {
                error!("Request panicked while answering");
                self.metrics.record_internal_error();
                EnhancedAnswer::with_message(INTERNAL_ERROR_MESSAGE)
            }
        };

        answer.metrics.latency_ms = latency_ms;
        if answer.answer == NO_RECORDS_SENTINEL {
            self.metrics.record_abstention();
        }

        info!(
            latency_ms,
            answerable = answer.metrics.answerable,
            citations = answer.metrics.citation_count,
            "Answered query"
        );

        answer
    }

    async fn answer(
        &self,
        query: &str,
        scope: &CallerScope,
        active_files: &[String],
    ) -> Result<EnhancedAnswer> {
        if scope.department.trim().is_empty() {
            return Err(SemanticError::Core(BastionError::invalid_input(
                "caller scope has no department",
            )));
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(EnhancedAnswer::with_message(NO_RECORDS_SENTINEL));
        }

        let routing = self.route(query).await;
        let request = RetrievalRequest::new(query, scope.clone())
            .with_active_files(active_files.to_vec())
            .with_routing(routing.clone());

        let mut attempt = self.attempt(&request).await;

        // Extractive answers quote the documents and skip the check.
        if attempt.generated && attempt.outcome.answerable && !attempt.outcome.extractive {
            if let Some(first) = self.assess(&attempt, query).await {
                if self.is_high_risk(&first) {
                    warn!(
                        risk = first.risk,
                        flagged = first.flagged_entities.len(),
                        "High hallucination risk; retrying with expanded retrieval"
                    );
                    self.metrics.record_hallucination_retry();

                    let retry = self
                        .attempt(&request.clone().with_high_uncertainty(true))
                        .await;
                    attempt = self.settle_retry(retry, query).await;
                }
            }
        }

        Ok(self.enhanced_answer(attempt, routing.as_ref()))
    }

    /// Keep the retry only if it is a generated, answerable answer that is
    /// either extractive or assessed as low-risk.
    async fn settle_retry(&self, retry: Attempt, query: &str) -> Attempt {
        let accepted = retry.generated
            && retry.outcome.answerable
            && (retry.outcome.extractive
                || matches!(self.assess(&retry, query).await, Some(r) if !self.is_high_risk(&r)));

        if accepted {
            return retry;
        }

        warn!("Hallucination retry did not produce a trustworthy answer; abstaining");
        Attempt {
            outcome: GateOutcome {
                response: NO_RECORDS_SENTINEL.to_string(),
                answerable: false,
                citation_count: 0,
                gate_applied: true,
                extractive: false,
            },
            ..retry
        }
    }

    async fn route(&self, query: &str) -> Option<RoutingResult> {
        let router = self.router.as_ref()?;
        match router.route(query).await {
            Ok(routing) => {
                debug!(decision = %routing.decision, confidence = routing.confidence, "Routed query");
                Some(routing)
            }
            Err(e) => {
                warn!("Query routing failed: {}", e);
                None
            }
        }
    }

    async fn assess(&self, attempt: &Attempt, query: &str) -> Option<HallucinationResult> {
        if !self.gate.config().enable_hallucination_check {
            return None;
        }
        let detector = self.detector.as_ref()?;

        match detector
            .assess(&attempt.outcome.response, &attempt.context.text, query)
            .await
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Hallucination assessment failed: {}", e);
                None
            }
        }
    }

    fn is_high_risk(&self, result: &HallucinationResult) -> bool {
        result.high_risk || result.risk >= self.gate.config().hallucination_risk_threshold
    }

    async fn attempt(&self, request: &RetrievalRequest) -> Attempt {
        let retrieval = self.orchestrator.retrieve(request).await;
        let context = self
            .assembler
            .assemble(&retrieval.documents, retrieval.global_context.as_deref());

        let user = build_user_prompt(&request.query, &context.text);
        let generation = generate_with_timeout(
            self.generator.as_deref(),
            SYSTEM_PROMPT,
            &user,
            self.generation_timeout,
        )
        .await;

        let query = request.query.as_str();
        let (outcome, generated) = match generation {
            GenerationResult::Ok(text) => (self.gate.apply(query, &text, false, &retrieval.documents), true),
            GenerationResult::Timeout => {
                self.metrics.record_generation_timeout();
                (
                    self.gate
                        .apply(query, TIMEOUT_PLACEHOLDER, true, &retrieval.documents),
                    false,
                )
            }
            GenerationResult::Failed(reason) => {
                if self.generator.is_some() {
                    self.metrics.record_generation_failure();
                }
                debug!(reason = %reason, "Using offline digest");
                (self.gate.offline_digest(query, &retrieval.documents), false)
            }
        };

        Attempt {
            retrieval,
            context,
            outcome,
            generated,
        }
    }

    fn enhanced_answer(&self, attempt: Attempt, routing: Option<&RoutingResult>) -> EnhancedAnswer {
        let retrieval = attempt.retrieval;

        let reasoning_steps = retrieval
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| ReasoningStep {
                rank: i + 1,
                document_id: doc.id.clone(),
                source: doc.source().to_string(),
                score: doc.score(),
            })
            .collect();

        let mut sources: Vec<String> = Vec::new();
        for source in attempt.context.sources {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        EnhancedAnswer {
            answer: attempt.outcome.response,
            reasoning_steps,
            sources,
            metrics: AnswerMetrics {
                latency_ms: 0,
                documents_retrieved: retrieval.documents.len() + retrieval.visual_documents.len(),
                routing_decision: routing.map(|r| r.decision.clone()),
                routing_confidence: routing.map(|r| r.confidence),
                answerable: attempt.outcome.answerable,
                citation_count: attempt.outcome.citation_count,
                gate_applied: attempt.outcome.gate_applied,
                strategies_used: retrieval.strategies_used,
            },
        }
    }
}

/// Builder for [`AnswerPipeline`].
pub struct AnswerPipelineBuilder {
    config: BastionConfig,
    store: Option<Arc<DocumentStore>>,
    strategies: Option<Vec<Arc<dyn RetrievalStrategy>>>,
    advanced: Vec<Arc<dyn AdvancedRetriever>>,
    generator: Option<Arc<dyn TextGenerator>>,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    router: Option<Arc<dyn QueryRouter>>,
    detector: Option<Arc<dyn HallucinationDetector>>,
}

impl AnswerPipelineBuilder {
    pub fn new(config: BastionConfig) -> Self {
        Self {
            config,
            store: None,
            strategies: None,
            advanced: Vec::new(),
            generator: None,
            rewriter: None,
            router: None,
            detector: None,
        }
    }

    /// Store searched by the standard strategy chain.
    pub fn store(mut self, store: Arc<DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the standard chain entirely.
    pub fn strategies(mut self, strategies: Vec<Arc<dyn RetrievalStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn advanced_retriever(mut self, retriever: Arc<dyn AdvancedRetriever>) -> Self {
        self.advanced.push(retriever);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn router(mut self, router: Arc<dyn QueryRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn HallucinationDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn build(self) -> Result<AnswerPipeline> {
        let config = self.config;
        config.validate()?;

        let strategies = match (self.strategies, self.store) {
            (Some(strategies), _) => strategies,
            (None, Some(store)) => standard_chain(store, &config.retrieval, self.advanced),
            (None, None) => {
                return Err(SemanticError::config(
                    "answer pipeline needs a document store or an explicit strategy chain",
                ));
            }
        };

        let fallback_cache = Arc::new(FallbackCache::new(
            config.cache.fallback_cache_size,
            Duration::from_secs(config.cache.fallback_cache_ttl_seconds),
        ));
        let mut orchestrator = RetrievalOrchestrator::new(strategies, config.retrieval.clone())
            .with_fallback_cache(fallback_cache);
        if let Some(rewriter) = self.rewriter {
            orchestrator = orchestrator.with_rewriter(rewriter);
        }

        let generator = match self.generator {
            Some(generator) => Some(generator),
            None if config.generation.enabled => Some(Arc::new(OpenAIChatGenerator::new(
                config.generation.clone(),
            )?) as Arc<dyn TextGenerator>),
            None => {
                info!("Generation disabled; answers will be extractive");
                None
            }
        };

        Ok(AnswerPipeline {
            orchestrator: Arc::new(orchestrator),
            assembler: ContextAssembler::new(config.context.clone()),
            gate: AnswerGate::new(config.gate.clone()),
            generator,
            router: self.router,
            detector: self.detector,
            generation_timeout: Duration::from_secs(config.generation.timeout_seconds),
            metrics: Arc::new(PipelineMetrics::default()),
        })
    }
}
