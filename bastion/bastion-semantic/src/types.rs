//! Shared types for retrieval and answering.

use bastion_core::{CallerScope, Document, DocumentId};
use serde::{Deserialize, Serialize};

/// A vector embedding.
pub type Vector = Vec<f32>;

/// Embedding model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            dimension,
        }
    }

    pub fn ollama(model: &str, dimension: usize) -> Self {
        Self::new("ollama", model, dimension)
    }
}

/// Cosine similarity. Returns 0.0 for zero vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot = dot_product(a, b);
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|x| x * x).sum::<f32>()).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Normalize a vector to unit length.
pub fn normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Output of the external routing/classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub decision: String,
    pub confidence: f64,
    /// Estimated query complexity in `[0, 1]`.
    pub complexity: f64,
    #[serde(default)]
    pub strategy_hints: Vec<String>,
}

impl Default for RoutingResult {
    fn default() -> Self {
        Self {
            decision: "direct".to_string(),
            confidence: 0.0,
            complexity: 0.0,
            strategy_hints: Vec::new(),
        }
    }
}

/// Output of the external hallucination scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationResult {
    pub risk: f64,
    #[serde(default)]
    pub flagged_entities: Vec<String>,
    pub high_risk: bool,
}

/// Link between a text passage and a visual asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossModalEdge {
    pub from: DocumentId,
    pub to: DocumentId,
    pub relation: String,
}

/// One retrieval call: the text to search for, who is asking, and which
/// files (if any) the caller has pinned.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub scope: CallerScope,
    pub active_files: Vec<String>,
    pub routing: Option<RoutingResult>,
    /// Set by the hallucination retry to widen the search.
    pub high_uncertainty: bool,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, scope: CallerScope) -> Self {
        Self {
            query: query.into(),
            scope,
            active_files: Vec::new(),
            routing: None,
            high_uncertainty: false,
        }
    }

    pub fn with_active_files(mut self, files: Vec<String>) -> Self {
        self.active_files = files;
        self
    }

    pub fn with_routing(mut self, routing: Option<RoutingResult>) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_high_uncertainty(mut self, high_uncertainty: bool) -> Self {
        self.high_uncertainty = high_uncertainty;
        self
    }

    /// Same request for a different query text.
    pub fn for_query(&self, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..self.clone()
        }
    }
}

/// Result of one retrieval strategy for one sub-query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub text_documents: Vec<Document>,
    pub visual_documents: Vec<Document>,
    pub cross_modal_edges: Vec<CrossModalEdge>,
    pub global_context: Option<String>,
    pub strategies_used: Vec<String>,
}

impl RetrievalContext {
    pub fn from_documents(strategy: &str, documents: Vec<Document>) -> Self {
        Self {
            text_documents: documents,
            strategies_used: vec![strategy.to_string()],
            ..Default::default()
        }
    }

    /// True when neither text nor visual results were found.
    pub fn is_empty(&self) -> bool {
        self.text_documents.is_empty() && self.visual_documents.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.text_documents.len() + self.visual_documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]), 1.0, epsilon = 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_retrieval_context_emptiness() {
        let mut ctx = RetrievalContext::default();
        assert!(ctx.is_empty());
        ctx.visual_documents.push(Document::new("img", "chart"));
        assert!(!ctx.is_empty());
        assert_eq!(ctx.document_count(), 1);
    }

    #[test]
    fn test_request_for_query_keeps_scope() {
        let request = RetrievalRequest::new("a", CallerScope::new("FINANCE"))
            .with_active_files(vec!["Q4.txt".into()])
            .with_high_uncertainty(true);
        let rewritten = request.for_query("b");
        assert_eq!(rewritten.query, "b");
        assert_eq!(rewritten.scope, request.scope);
        assert_eq!(rewritten.active_files, request.active_files);
        assert!(rewritten.high_uncertainty);
    }
}
