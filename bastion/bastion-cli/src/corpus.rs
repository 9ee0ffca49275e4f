//! JSON corpus files: an array of documents with their scope metadata.
//!
//! ```json
//! [
//!   {"id": "q4", "content": "Revenue rose 12%.", "source": "Q4.txt",
//!    "department": "FINANCE", "workspaceId": "acme"}
//! ]
//! ```

use anyhow::{Context, Result};
use bastion_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    pub source: String,
    pub department: String,
    #[serde(default, rename = "workspaceId", skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Extra metadata fields, merged under the scope fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl CorpusEntry {
    /// Explicit id, or `<source>#<position>`.
    pub fn document_id(&self, position: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}#{}", self.source, position))
    }

    pub fn to_document(&self, position: usize) -> Document {
        let mut doc = Document::new(self.document_id(position), self.content.clone());
        for (key, value) in &self.metadata {
            doc.metadata.insert(key.clone(), value.clone());
        }
        doc = doc
            .with_metadata("source", self.source.as_str())
            .with_metadata("department", self.department.as_str());
        if let Some(workspace) = &self.workspace_id {
            doc = doc.with_metadata("workspaceId", workspace.as_str());
        }
        doc
    }
}

pub async fn read_corpus(path: &Path) -> Result<Vec<CorpusEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse corpus file: {}", path.display()))
}

pub async fn write_corpus(path: &Path, entries: &[CorpusEntry]) -> Result<()> {
    let content = serde_json::to_string_pretty(entries).context("Failed to serialize corpus")?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write corpus file: {}", path.display()))
}

pub fn to_documents(entries: &[CorpusEntry]) -> Vec<Document> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| entry.to_document(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_corpus_round_trip_and_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        tokio::fs::write(
            &path,
            r#"[
                {"id": "q4", "content": "Revenue rose 12%.", "source": "Q4.txt",
                 "department": "FINANCE", "workspaceId": "acme", "metadata": {"year": 2024}},
                {"content": "Hire 3 analysts.", "source": "plan.txt", "department": "FINANCE"}
            ]"#,
        )
        .await
        .unwrap();

        let entries = read_corpus(&path).await.unwrap();
        let docs = to_documents(&entries);
        assert_eq!(docs[0].id, "q4");
        assert_eq!(docs[0].workspace_id(), Some("acme"));
        assert_eq!(docs[0].metadata["year"], 2024);
        assert_eq!(docs[1].id, "plan.txt#1");
        assert_eq!(docs[1].workspace_id(), None);

        write_corpus(&path, &entries[1..]).await.unwrap();
        assert_eq!(read_corpus(&path).await.unwrap(), entries[1..].to_vec());
    }

    #[tokio::test]
    async fn test_malformed_corpus_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(read_corpus(&path).await.is_err());
    }
}
