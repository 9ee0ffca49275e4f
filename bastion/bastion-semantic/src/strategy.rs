//! Retrieval strategies tried, in order, by the orchestrator.

use crate::config::RetrievalConfig;
use crate::error::{Result, SemanticError};
use crate::orchestration::matches_active_file;
use crate::query::sparse_weights;
use crate::store::DocumentStore;
use crate::types::{RetrievalContext, RetrievalRequest};
use async_trait::async_trait;
use bastion_core::{BastionError, CallerScope, Document, FilterBuilder};
use std::collections::HashSet;
use std::sync::Arc;

/// One way of finding documents for a (sub-)query.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Advanced strategies only run when the query looks complex.
    fn is_advanced(&self) -> bool {
        false
    }

    /// Whether the strategy is meaningful for this request at all.
    fn applies_to(&self, _request: &RetrievalRequest) -> bool {
        true
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext>;
}

/// External graph/entity or cross-reference retrieval service.
#[async_trait]
pub trait AdvancedRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext>;
}

/// Filter text restricting results to the caller's scope.
pub fn scope_filter(scope: &CallerScope) -> Result<String> {
    FilterBuilder::for_scope(scope).build().ok_or_else(|| {
        SemanticError::Core(BastionError::invalid_input(
            "caller scope cannot be expressed as a filter",
        ))
    })
}

fn file_scope_filter(scope: &CallerScope, files: &[String]) -> Result<String> {
    FilterBuilder::for_scope(scope)
        .or_any_of("source", files.iter().cloned())
        .or_any_of("filename", files.iter().cloned())
        .build()
        .ok_or_else(|| {
            SemanticError::Core(BastionError::invalid_input(
                "active file scope cannot be expressed as a filter",
            ))
        })
}

/// Append `extra` to `base`, skipping ids already present.
fn merge_first_seen(mut base: Vec<Document>, extra: Vec<Document>) -> Vec<Document> {
    let mut seen: HashSet<String> = base.iter().map(|d| d.id.clone()).collect();
    base.extend(extra.into_iter().filter(|d| seen.insert(d.id.clone())));
    base
}

async fn dense_and_sparse(
    store: &DocumentStore,
    config: &RetrievalConfig,
    query: &str,
    filter: &str,
) -> Result<Vec<Document>> {
    let dense = store
        .similarity_search(query, config.top_k, config.similarity_threshold, Some(filter))
        .await?;
    let sparse = store
        .sparse_search(
            &sparse_weights(query),
            Some(filter),
            config.top_k,
            config.sparse_threshold,
        )
        .await?;
    Ok(merge_first_seen(dense, sparse))
}

/// Search restricted to the files the caller has pinned.
pub struct FileScopedStrategy {
    store: Arc<DocumentStore>,
    config: RetrievalConfig,
}

impl FileScopedStrategy {
    pub fn new(store: Arc<DocumentStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl RetrievalStrategy for FileScopedStrategy {
    fn name(&self) -> &str {
        "file_scoped"
    }

    fn applies_to(&self, request: &RetrievalRequest) -> bool {
        !request.active_files.is_empty()
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext> {
        let filter = file_scope_filter(&request.scope, &request.active_files)?;
        let mut docs = dense_and_sparse(&self.store, &self.config, &request.query, &filter).await?;

        if docs.is_empty() {
            // Pinned names may be partial paths: search the whole scope and
            // keep documents whose name matches.
            let wide = RetrievalConfig {
                top_k: self.store.len().max(self.config.top_k),
                ..self.config.clone()
            };
            let filter = scope_filter(&request.scope)?;
            docs = dense_and_sparse(&self.store, &wide, &request.query, &filter)
                .await?
                .into_iter()
                .filter(|d| matches_active_file(d, &request.active_files))
                .take(self.config.top_k)
                .collect();
        }

        Ok(RetrievalContext::from_documents(self.name(), docs))
    }
}

/// Wraps an [`AdvancedRetriever`] collaborator.
pub struct ExternalStrategy {
    name: String,
    retriever: Arc<dyn AdvancedRetriever>,
}

impl ExternalStrategy {
    pub fn new(retriever: Arc<dyn AdvancedRetriever>) -> Self {
        Self {
            name: retriever.name().to_string(),
            retriever,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for ExternalStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_advanced(&self) -> bool {
        true
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext> {
        let mut ctx = self.retriever.retrieve(request).await?;
        if ctx.strategies_used.is_empty() {
            ctx.strategies_used.push(self.name.clone());
        }
        Ok(ctx)
    }
}

/// Scoped dense similarity search.
pub struct DenseStrategy {
    store: Arc<DocumentStore>,
    config: RetrievalConfig,
}

impl DenseStrategy {
    pub fn new(store: Arc<DocumentStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl RetrievalStrategy for DenseStrategy {
    fn name(&self) -> &str {
        "dense"
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext> {
        let filter = scope_filter(&request.scope)?;
        let docs = self
            .store
            .similarity_search(
                &request.query,
                self.config.top_k,
                self.config.similarity_threshold,
                Some(&filter),
            )
            .await?;
        Ok(RetrievalContext::from_documents(self.name(), docs))
    }
}

/// Scoped dense plus sparse search. Always last in the chain.
pub struct HybridStrategy {
    store: Arc<DocumentStore>,
    config: RetrievalConfig,
}

impl HybridStrategy {
    pub fn new(store: Arc<DocumentStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl RetrievalStrategy for HybridStrategy {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalContext> {
        let filter = scope_filter(&request.scope)?;
        let docs = dense_and_sparse(&self.store, &self.config, &request.query, &filter).await?;
        Ok(RetrievalContext::from_documents(self.name(), docs))
    }
}

/// The standard chain: file-scoped, external advanced retrievers, dense,
/// hybrid.
pub fn standard_chain(
    store: Arc<DocumentStore>,
    config: &RetrievalConfig,
    advanced: Vec<Arc<dyn AdvancedRetriever>>,
) -> Vec<Arc<dyn RetrievalStrategy>> {
    let mut chain: Vec<Arc<dyn RetrievalStrategy>> = vec![Arc::new(FileScopedStrategy::new(
        store.clone(),
        config.clone(),
    ))];
    chain.extend(
        advanced
            .into_iter()
            .map(|r| Arc::new(ExternalStrategy::new(r)) as Arc<dyn RetrievalStrategy>),
    );
    chain.push(Arc::new(DenseStrategy::new(store.clone(), config.clone())));
    chain.push(Arc::new(HybridStrategy::new(store, config.clone())));
    chain
}
