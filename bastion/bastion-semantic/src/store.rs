//! Document store: scoped dense and sparse search over a metadata store.

use crate::error::{Result, SemanticError};
use crate::providers::EmbeddingProvider;
use crate::query::sparse_weights;
use crate::types::cosine_similarity;
use async_trait::async_trait;
use bastion_core::filter::{self, Condition, FilterOp, ParseResult, ParsedFilter};
use bastion_core::{Document, DocumentId};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Backing store holding documents and their metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Whether `query_filtered` can answer this filter from an index.
    fn supports_pushdown(&self, filter: &ParsedFilter) -> bool;

    /// Documents matching `filter`, evaluated inside the store.
    async fn query_filtered(&self, filter: &ParsedFilter) -> Result<Vec<Document>>;

    async fn scan_all(&self) -> Result<Vec<Document>>;

    async fn upsert(&self, documents: Vec<Document>) -> Result<()>;

    /// Remove documents by id and return how many existed.
    async fn delete(&self, ids: &[DocumentId]) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store with an equality index on selected metadata fields.
pub struct InMemoryMetadataStore {
    documents: DashMap<DocumentId, Document>,
    indexed_fields: HashSet<String>,
    /// field -> value text -> ids
    index: RwLock<HashMap<String, HashMap<String, HashSet<DocumentId>>>>,
    offline: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new<I, S>(indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            documents: DashMap::new(),
            indexed_fields: indexed_fields.into_iter().map(Into::into).collect(),
            index: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every operation fails until set back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(SemanticError::store("document store unavailable"));
        }
        Ok(())
    }

    fn index_keys(value: &Value) -> Vec<String> {
        match value {
            Value::String(s) => vec![s.clone()],
            Value::Number(n) => vec![n.to_string()],
            Value::Bool(b) => vec![b.to_string()],
            Value::Array(items) => items.iter().flat_map(Self::index_keys).collect(),
            _ => Vec::new(),
        }
    }

    fn index_document(&self, index: &mut HashMap<String, HashMap<String, HashSet<DocumentId>>>, doc: &Document) {
        for field in &self.indexed_fields {
            if let Some(value) = doc.metadata.get(field) {
                for key in Self::index_keys(value) {
                    index
                        .entry(field.clone())
                        .or_default()
                        .entry(key)
                        .or_default()
                        .insert(doc.id.clone());
                }
            }
        }
    }

    fn unindex_document(&self, index: &mut HashMap<String, HashMap<String, HashSet<DocumentId>>>, doc: &Document) {
        for field in &self.indexed_fields {
            let Some(value) = doc.metadata.get(field) else {
                continue;
            };
            if let Some(values) = index.get_mut(field) {
                for key in Self::index_keys(value) {
                    if let Some(ids) = values.get_mut(&key) {
                        ids.remove(&doc.id);
                        if ids.is_empty() {
                            values.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// An indexable condition is an equality or `in` on an indexed field with
    /// non-numeric values, so the index text lookup agrees with `evaluate`.
    fn is_indexable(&self, condition: &Condition) -> bool {
        matches!(condition.op, FilterOp::Eq | FilterOp::In)
            && self.indexed_fields.contains(&condition.key)
            && condition
                .values
                .iter()
                .all(|v| v.trim().parse::<f64>().is_err())
    }

    fn lookup(
        index: &HashMap<String, HashMap<String, HashSet<DocumentId>>>,
        condition: &Condition,
    ) -> HashSet<DocumentId> {
        let Some(values) = index.get(&condition.key) else {
            return HashSet::new();
        };
        condition
            .values
            .iter()
            .filter_map(|v| values.get(v))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new(["department", "workspaceId", "source", "filename"])
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    fn supports_pushdown(&self, filter: &ParsedFilter) -> bool {
        filter
            .or_groups()
            .iter()
            .all(|group| group.iter().any(|c| self.is_indexable(c)))
    }

    async fn query_filtered(&self, filter: &ParsedFilter) -> Result<Vec<Document>> {
        self.ensure_online()?;
        if !self.supports_pushdown(filter) {
            return Err(SemanticError::store("filter cannot be pushed down"));
        }

        let candidates: HashSet<DocumentId> = {
            let index = self.index.read();
            filter
                .or_groups()
                .iter()
                .flat_map(|group| {
                    group
                        .iter()
                        .filter(|c| self.is_indexable(c))
                        .map(|c| Self::lookup(&index, c))
                        .reduce(|acc, ids| acc.intersection(&ids).cloned().collect())
                        .unwrap_or_default()
                })
                .collect()
        };

        // The index narrows; the full filter still decides.
        Ok(candidates
            .into_iter()
            .filter_map(|id| self.documents.get(&id).map(|entry| entry.value().clone()))
            .filter(|doc| filter::evaluate(&doc.metadata, filter))
            .collect())
    }

    async fn scan_all(&self) -> Result<Vec<Document>> {
        self.ensure_online()?;
        Ok(self
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert(&self, documents: Vec<Document>) -> Result<()> {
        self.ensure_online()?;
        let mut index = self.index.write();
        for doc in documents {
            if let Some(previous) = self.documents.insert(doc.id.clone(), doc.clone()) {
                self.unindex_document(&mut index, &previous);
            }
            self.index_document(&mut index, &doc);
        }
        Ok(())
    }

    async fn delete(&self, ids: &[DocumentId]) -> Result<usize> {
        self.ensure_online()?;
        let mut index = self.index.write();
        let mut removed = 0;
        for id in ids {
            if let Some((_, doc)) = self.documents.remove(id) {
                self.unindex_document(&mut index, &doc);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Store metrics.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub total_searches: AtomicU64,
    pub pushdown_queries: AtomicU64,
    pub scan_queries: AtomicU64,
    pub rejected_filters: AtomicU64,
    pub total_deletes: AtomicU64,
    pub documents_added: AtomicU64,
    pub failed_operations: AtomicU64,
}

/// Dense and sparse search over a [`MetadataStore`], always through a
/// filter expression.
pub struct DocumentStore {
    backend: Arc<dyn MetadataStore>,
    provider: Arc<dyn EmbeddingProvider>,
    metrics: Arc<StoreMetrics>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn MetadataStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            backend,
            provider,
            metrics: Arc::new(StoreMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Documents admitted by `filter_text`, or `None` when the filter is
    /// malformed.
    async fn candidates(&self, filter_text: Option<&str>) -> Result<Option<Vec<Document>>> {
        let candidates = match filter::parse(filter_text) {
            ParseResult::Invalid => {
                warn!("Rejected malformed filter; returning no documents");
                self.metrics.rejected_filters.fetch_add(1, AtomicOrdering::Relaxed);
                return Ok(None);
            }
            ParseResult::NoFilter => {
                self.metrics.scan_queries.fetch_add(1, AtomicOrdering::Relaxed);
                self.backend.scan_all().await
            }
            ParseResult::Valid(parsed) if self.backend.supports_pushdown(&parsed) => {
                self.metrics.pushdown_queries.fetch_add(1, AtomicOrdering::Relaxed);
                self.backend.query_filtered(&parsed).await
            }
            ParseResult::Valid(parsed) => {
                self.metrics.scan_queries.fetch_add(1, AtomicOrdering::Relaxed);
                self.backend.scan_all().await.map(|docs| {
                    docs.into_iter()
                        .filter(|doc| filter::evaluate(&doc.metadata, &parsed))
                        .collect()
                })
            }
        };

        candidates.map(Some).inspect_err(|_| {
            self.metrics.failed_operations.fetch_add(1, AtomicOrdering::Relaxed);
        })
    }

    /// Cosine-similarity search. Results carry their similarity in `score`.
    pub async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
        filter_text: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.metrics.total_searches.fetch_add(1, AtomicOrdering::Relaxed);
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let Some(candidates) = self.candidates(filter_text).await? else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.provider.embed(query).await?;

        let mut scored: Vec<(f32, Document)> = candidates
            .into_iter()
            .filter_map(|doc| {
                let embedding = doc.embedding.as_ref()?;
                if embedding.len() != query_embedding.len() {
                    debug!(id = %doc.id, "Skipping document with mismatched embedding dimension");
                    return None;
                }
                let score = cosine_similarity(&query_embedding, embedding);
                (score >= similarity_threshold).then_some((score, doc))
            })
            .collect();

        Ok(rank_and_truncate(&mut scored, top_k))
    }

    /// Dot-product search over sparse term weights. Documents without
    /// weights, or sharing no terms with the query, are excluded.
    pub async fn sparse_search(
        &self,
        query_weights: &HashMap<String, f32>,
        filter_text: Option<&str>,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<Document>> {
        if query_weights.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        self.metrics.total_searches.fetch_add(1, AtomicOrdering::Relaxed);

        let Some(candidates) = self.candidates(filter_text).await? else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, Document)> = candidates
            .into_iter()
            .filter_map(|doc| {
                let weights = doc.sparse.as_ref()?;
                let score: f32 = query_weights
                    .iter()
                    .filter_map(|(term, qw)| weights.get(term).map(|dw| qw * dw))
                    .sum();
                (score > 0.0 && score >= threshold).then_some((score, doc))
            })
            .collect();

        Ok(rank_and_truncate(&mut scored, top_k))
    }

    /// Delete by id. `Some(false)` for an empty list, `Some(removed > 0)`
    /// otherwise, `None` when the backing store failed.
    pub async fn delete(&self, ids: &[DocumentId]) -> Option<bool> {
        if ids.is_empty() {
            return Some(false);
        }
        self.metrics.total_deletes.fetch_add(1, AtomicOrdering::Relaxed);

        match self.backend.delete(ids).await {
            Ok(removed) => {
                debug!(requested = ids.len(), removed, "Deleted documents");
                Some(removed > 0)
            }
            Err(e) => {
                error!("Failed to delete documents: {}", e);
                self.metrics.failed_operations.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    /// Embed documents that lack an embedding, derive missing sparse weights,
    /// then upsert.
    pub async fn add_documents(&self, mut documents: Vec<Document>) -> Result<usize> {
        for doc in documents.iter_mut().filter(|d| d.sparse.is_none()) {
            doc.sparse = Some(sparse_weights(&doc.content));
        }

        let missing: Vec<usize> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing
                .iter()
                .map(|&i| documents[i].content.clone())
                .collect();
            let embeddings = self.provider.embed_batch(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(SemanticError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                )));
            }
            for (i, embedding) in missing.into_iter().zip(embeddings) {
                documents[i].embedding = Some(embedding);
            }
        }

        let count = documents.len();
        self.backend.upsert(documents).await?;
        self.metrics
            .documents_added
            .fetch_add(count as u64, AtomicOrdering::Relaxed);
        Ok(count)
    }
}

fn rank_and_truncate(scored: &mut Vec<(f32, Document)>, top_k: usize) -> Vec<Document> {
    scored.sort_by(|(sa, da), (sb, db)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| da.id.cmp(&db.id))
    });
    scored.truncate(top_k);
    std::mem::take(scored)
        .into_iter()
        .map(|(score, mut doc)| {
            doc.set_score(score as f64);
            doc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use approx::assert_relative_eq;

    fn store() -> (Arc<InMemoryMetadataStore>, DocumentStore) {
        let backend = Arc::new(InMemoryMetadataStore::default());
        let store = DocumentStore::new(backend.clone(), Arc::new(MockProvider::new(64)));
        (backend, store)
    }

    fn weights(pairs: &[(&str, f32)]) -> HashMap<String, f32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_similarity_search_scopes_and_scores() {
        let (_, store) = store();
        store
            .add_documents(vec![
                Document::scoped("f1", "quarterly revenue report", "Q4.txt", "FINANCE", "ws"),
                Document::scoped("m1", "quarterly revenue report", "M.txt", "MEDICAL", "ws"),
            ])
            .await
            .unwrap();

        let results = store
            .similarity_search(
                "quarterly revenue report",
                5,
                0.5,
                Some("department == 'FINANCE'"),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "f1");
        assert_relative_eq!(results[0].score(), 1.0, epsilon = 1e-5);
        assert_eq!(store.metrics().pushdown_queries.load(AtomicOrdering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_invalid_filter_returns_nothing() {
        let (_, store) = store();
        store
            .add_documents(vec![Document::scoped("f1", "revenue", "Q4.txt", "FINANCE", "ws")])
            .await
            .unwrap();

        let results = store
            .similarity_search("revenue", 5, -1.0, Some("department = 'FINANCE' OR 1=1"))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(store.metrics().rejected_filters.load(AtomicOrdering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_numeric_looking_workspace_ids_match_exactly() {
        let (_, store) = store();
        store
            .add_documents(vec![
                Document::scoped("mine", "revenue", "a.txt", "FINANCE", "1"),
                Document::scoped("other", "revenue", "b.txt", "FINANCE", "01"),
                Document::scoped("other2", "revenue", "c.txt", "FINANCE", "1.0"),
            ])
            .await
            .unwrap();

        let results = store
            .similarity_search(
                "revenue",
                10,
                -1.0,
                Some("department == 'FINANCE' && workspaceId == '1'"),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["mine"]);
    }

    #[tokio::test]
    async fn test_similarity_skips_missing_and_mismatched_embeddings() {
        let (backend, store) = store();
        backend
            .upsert(vec![
                Document::new("no-embedding", "revenue"),
                Document::new("short", "revenue").with_embedding(vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.similarity_search("revenue", 5, -1.0, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_sparse_search_orders_by_dot_product() {
        let (backend, store) = store();
        backend
            .upsert(vec![
                Document::new("a", "cyber").with_sparse(weights(&[("cyber", 0.2)])),
                Document::new("b", "cyber threat").with_sparse(weights(&[("cyber", 0.5), ("threat", 0.5)])),
                Document::new("c", "threat").with_sparse(weights(&[("threat", 0.9)])),
                Document::new("d", "cyber threat, no weights"),
                Document::new("e", "unrelated").with_sparse(weights(&[("budget", 1.0)])),
            ])
            .await
            .unwrap();

        let query = weights(&[("cyber", 1.0), ("threat", 0.8)]);
        let results = store.sparse_search(&query, None, 2, 0.01).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_relative_eq!(results[0].score(), 0.9, epsilon = 1e-6);
        assert_relative_eq!(results[1].score(), 0.72, epsilon = 1e-6);

        assert!(store.sparse_search(&HashMap::new(), None, 2, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_contract() {
        let (backend, store) = store();
        backend
            .upsert(vec![Document::new("id-that-exists", "x")])
            .await
            .unwrap();

        assert_eq!(store.delete(&[]).await, Some(false));
        assert_eq!(store.delete(&["missing".to_string()]).await, Some(false));
        assert_eq!(store.delete(&["id-that-exists".to_string()]).await, Some(true));
        assert!(store.is_empty());

        backend.set_offline(true);
        assert_eq!(store.delete(&["x".to_string()]).await, None);
    }

    #[tokio::test]
    async fn test_pushdown_matches_scan() {
        let backend = InMemoryMetadataStore::default();
        backend
            .upsert(vec![
                Document::scoped("1", "a", "a.txt", "FINANCE", "w1"),
                Document::scoped("2", "b", "b.txt", "FINANCE", "w2"),
                Document::scoped("3", "c", "a.txt", "MEDICAL", "w1").with_metadata("tags", serde_json::json!(["x"])),
            ])
            .await
            .unwrap();

        let filter_text = "department == 'FINANCE' && source in ['a.txt', 'b.txt'] || workspaceId == 'w1' && department != 'FINANCE'";
        let ParseResult::Valid(parsed) = filter::parse(Some(filter_text)) else {
            panic!("filter should parse");
        };
        assert!(backend.supports_pushdown(&parsed));

        let mut pushed: Vec<String> = backend
            .query_filtered(&parsed)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        pushed.sort();

        let mut scanned: Vec<String> = backend
            .scan_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|d| filter::evaluate(&d.metadata, &parsed))
            .map(|d| d.id)
            .collect();
        scanned.sort();

        assert_eq!(pushed, scanned);
        assert_eq!(pushed, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_range_filters_fall_back_to_scan() {
        let backend = InMemoryMetadataStore::default();
        let ParseResult::Valid(parsed) = filter::parse(Some("page >= 3")) else {
            panic!("filter should parse");
        };
        assert!(!backend.supports_pushdown(&parsed));
    }

    #[tokio::test]
    async fn test_upsert_reindexes() {
        let backend = InMemoryMetadataStore::default();
        backend
            .upsert(vec![Document::scoped("1", "a", "a.txt", "FINANCE", "w1")])
            .await
            .unwrap();
        backend
            .upsert(vec![Document::scoped("1", "a", "a.txt", "MEDICAL", "w1")])
            .await
            .unwrap();

        let ParseResult::Valid(parsed) = filter::parse(Some("department == 'FINANCE'")) else {
            panic!("filter should parse");
        };
        assert!(backend.query_filtered(&parsed).await.unwrap().is_empty());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let (backend, store) = store();
        backend.set_offline(true);
        let result = store.similarity_search("x", 5, 0.0, Some("department == 'X'")).await;
        assert!(matches!(result, Err(SemanticError::Store(_))));
        assert_eq!(store.metrics().failed_operations.load(AtomicOrdering::Relaxed), 1);
    }
}
