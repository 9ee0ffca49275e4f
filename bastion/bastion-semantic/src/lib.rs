//! Scoped retrieval and gated answering for Bastion.
//!
//! This crate turns a question from a caller in a department (and optionally
//! a workspace) into an answer grounded in that caller's documents only:
//! - Embedding providers (OpenAI, Ollama, deterministic mock) with fallback
//! - A document store with dense and sparse search behind the filter language
//! - Compound-question decomposition
//! - An ordered retrieval strategy chain with corrective rewriting and a
//!   fallback cache
//! - Budgeted context assembly
//! - An answerability and citation gate with extractive fallbacks
//!
//! # Architecture
//!
//! - **Document Store**: filtered similarity and sparse search over a
//!   [`MetadataStore`] backend
//! - **Orchestrator**: runs strategies per sub-query, unions, re-checks scope
//!   and ranks
//! - **Context Assembler**: packs ranked documents under character budgets
//! - **Answer Gate**: decides whether a response may be shown
//! - **Pipeline**: wires everything behind `ask` / `ask_enhanced`
//!
//! # Example
//!
//! ```no_run
//! use bastion_semantic::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(DocumentStore::new(
//!     Arc::new(InMemoryMetadataStore::default()),
//!     Arc::new(MockProvider::new(384)),
//! ));
//! store
//!     .add_documents(vec![Document::scoped(
//!         "q4",
//!         "Revenue rose 12% in Q4.",
//!         "Q4.txt",
//!         "FINANCE",
//!         "acme",
//!     )])
//!     .await?;
//!
//! let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store)?;
//! let scope = CallerScope::new("FINANCE").with_workspace("acme");
//! println!("{}", pipeline.ask("What was revenue growth?", &scope, &[]).await);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod generation;
pub mod metrics;
pub mod orchestration;
pub mod pipeline;
pub mod providers;
pub mod query;
pub mod ranking;
pub mod store;
pub mod strategy;
pub mod types;

pub use cache::{FallbackCache, FallbackCacheKey};
pub use config::{
    BastionConfig, CacheConfig, ContextConfig, EmbeddingProviderConfig, GateConfig,
    GenerationConfig, RetrievalConfig,
};
pub use context::{AssembledContext, ContextAssembler};
pub use error::{Result, SemanticError};
pub use gate::{AnswerGate, GateOutcome, HallucinationDetector, NO_RECORDS_SENTINEL};
pub use generation::{GenerationResult, OpenAIChatGenerator, TextGenerator};
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot, RetrievalMetrics};
pub use orchestration::{
    OrchestrationResult, QueryRewriter, QueryRouter, RetrievalOrchestrator, StrategyOutcome,
    StrategyTrace,
};
pub use pipeline::{
    AnswerMetrics, AnswerPipeline, AnswerPipelineBuilder, EnhancedAnswer, ReasoningStep,
    INTERNAL_ERROR_MESSAGE,
};
pub use providers::{EmbeddingProvider, MockProvider, OllamaProvider, OpenAIProvider, ProviderManager};
pub use query::QueryDecomposer;
pub use ranking::sort_documents_deterministically;
pub use store::{DocumentStore, InMemoryMetadataStore, MetadataStore, StoreMetrics};
pub use strategy::{AdvancedRetriever, RetrievalStrategy};
pub use types::{
    CrossModalEdge, EmbeddingModel, HallucinationResult, RetrievalContext, RetrievalRequest,
    RoutingResult, Vector,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::BastionConfig;
    pub use crate::error::{Result, SemanticError};
    pub use crate::pipeline::{AnswerPipeline, EnhancedAnswer};
    pub use crate::providers::{EmbeddingProvider, MockProvider};
    pub use crate::store::{DocumentStore, InMemoryMetadataStore};
    pub use crate::types::{RetrievalRequest, RoutingResult};
    pub use bastion_core::{CallerScope, Document};
}
