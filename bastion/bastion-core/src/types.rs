//! Core data model: documents and the caller's authorized scope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Document identifier.
pub type DocumentId = String;

/// Free-form document metadata as produced by ingestion.
pub type Metadata = HashMap<String, Value>;

/// Metadata key holding the originating file name.
pub const META_SOURCE: &str = "source";
/// Alternate metadata key for the originating file name.
pub const META_FILENAME: &str = "filename";
/// Metadata key holding the department (sector).
pub const META_DEPARTMENT: &str = "department";
/// Metadata key holding the workspace partition.
pub const META_WORKSPACE: &str = "workspaceId";
/// Metadata key holding the retrieval score.
pub const META_SCORE: &str = "score";
/// Alternate metadata key some stores use for the retrieval score.
pub const META_SIMILARITY: &str = "similarity";

/// A retrievable passage.
///
/// Documents are produced by an external ingestion pipeline and are only
/// read here. Within one request a document is never mutated except for its
/// `score` metadata, which retrieval and ranking write onto their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Dense embedding, if the ingestion pipeline computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Sparse term weights for lexical scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<HashMap<String, f32>>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            embedding: None,
            sparse: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_sparse(mut self, weights: HashMap<String, f32>) -> Self {
        self.sparse = Some(weights);
        self
    }

    /// Convenience constructor for a scoped document.
    pub fn scoped(
        id: impl Into<DocumentId>,
        content: impl Into<String>,
        source: &str,
        department: &str,
        workspace_id: &str,
    ) -> Self {
        Self::new(id, content)
            .with_metadata(META_SOURCE, source)
            .with_metadata(META_DEPARTMENT, department)
            .with_metadata(META_WORKSPACE, workspace_id)
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Originating file name: `source`, then `filename`, then the id.
    pub fn source(&self) -> &str {
        self.meta_str(META_SOURCE)
            .filter(|s| !s.is_empty())
            .or_else(|| self.meta_str(META_FILENAME).filter(|s| !s.is_empty()))
            .unwrap_or(&self.id)
    }

    pub fn department(&self) -> Option<&str> {
        self.meta_str(META_DEPARTMENT)
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.meta_str(META_WORKSPACE)
    }

    /// Current score (`score`, then `similarity`), defaulting to 0.0.
    pub fn score(&self) -> f64 {
        [META_SCORE, META_SIMILARITY]
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .find_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            })
            .filter(|score| score.is_finite())
            .unwrap_or(0.0)
    }

    pub fn set_score(&mut self, score: f64) {
        let value = serde_json::Number::from_f64(score)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.metadata.insert(META_SCORE.to_string(), value);
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.set_score(score);
        self
    }

    /// Whether the document belongs to the caller's authorized scope.
    pub fn in_scope(&self, scope: &CallerScope) -> bool {
        if self.department() != Some(scope.department.as_str()) {
            return false;
        }
        match &scope.workspace_id {
            Some(workspace) => self.workspace_id() == Some(workspace.as_str()),
            None => true,
        }
    }
}

/// The already-authorized scope of a caller.
///
/// Authentication and clearance checks happen before the core is invoked;
/// the core only ever narrows retrieval to this scope, never widens it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerScope {
    pub department: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

impl CallerScope {
    pub fn new(department: impl Into<String>) -> Self {
        Self {
            department: department.into(),
            workspace_id: None,
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }
}
