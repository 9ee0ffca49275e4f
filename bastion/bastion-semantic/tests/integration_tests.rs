//! End-to-end tests for retrieval and gated answering.

use async_trait::async_trait;
use bastion_semantic::prelude::*;
use bastion_semantic::{
    AdvancedRetriever, MetadataStore, QueryDecomposer, QueryRewriter, RetrievalContext,
    NO_RECORDS_SENTINEL,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn finance_scope() -> CallerScope {
    CallerScope::new("FINANCE").with_workspace("acme")
}

/// Store over an in-memory backend the test can take offline.
async fn q4_store() -> (Arc<InMemoryMetadataStore>, Arc<DocumentStore>) {
    let backend = Arc::new(InMemoryMetadataStore::default());
    let store = Arc::new(DocumentStore::new(
        backend.clone(),
        Arc::new(MockProvider::new(1024)),
    ));
    store
        .add_documents(vec![
            Document::scoped("q4", "Revenue rose 12% [Q4.txt].", "Q4.txt", "FINANCE", "acme"),
            Document::scoped("clinic", "Clinic revenue rose 30%.", "clinic.txt", "MEDICAL", "acme"),
        ])
        .await
        .unwrap();
    (backend, store)
}

#[tokio::test]
async fn test_q4_revenue_is_answerable_with_citation() {
    let (_, store) = q4_store().await;
    let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store).unwrap();

    let answer = pipeline
        .ask_enhanced("What was revenue growth?", &finance_scope(), &[])
        .await;

    assert!(answer.metrics.answerable);
    assert!(answer.metrics.citation_count >= 1);
    assert!(answer.answer.contains("[Q4.txt]"));
    assert!(!answer.answer.contains("clinic"));
}

#[tokio::test]
async fn test_unrelated_question_gets_sentinel() {
    let (_, store) = q4_store().await;
    let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store).unwrap();

    let answer = pipeline
        .ask("What is the capital of France?", &finance_scope(), &[])
        .await;

    assert_eq!(answer, "No relevant records found.");
    assert_eq!(pipeline.metrics().abstentions(), 1);
}

#[tokio::test]
async fn test_sparse_search_ranks_by_dot_product() {
    let backend = Arc::new(InMemoryMetadataStore::default());
    let store = DocumentStore::new(backend.clone(), Arc::new(MockProvider::new(64)));

    let weights = |pairs: &[(&str, f32)]| -> HashMap<String, f32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    };
    backend
        .upsert(vec![
            Document::new("both", "x").with_sparse(weights(&[("cyber", 1.0), ("threat", 1.0)])),
            Document::new("cyber", "y").with_sparse(weights(&[("cyber", 0.5)])),
            Document::new("threat", "z").with_sparse(weights(&[("threat", 0.1)])),
            Document::new("plain", "cyber threat"),
        ])
        .await
        .unwrap();

    let query = weights(&[("cyber", 1.0), ("threat", 0.8)]);
    let results = store.sparse_search(&query, None, 2, 0.01).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["both", "cyber"]);
    assert!(results[0].score() > results[1].score());
}

#[tokio::test]
async fn test_delete_semantics() {
    let (_, store) = q4_store().await;

    assert_eq!(store.delete(&[]).await, Some(false));
    assert_eq!(store.delete(&["q4".to_string()]).await, Some(true));
    assert_eq!(store.delete(&["q4".to_string()]).await, Some(false));
}

#[tokio::test]
async fn test_delete_reports_store_failure() {
    let (backend, store) = q4_store().await;
    backend.set_offline(true);
    assert_eq!(store.delete(&["q4".to_string()]).await, None);
}

#[test]
fn test_decompose_compound_question() {
    let parts = QueryDecomposer::new()
        .decompose("What is the travel policy and who is responsible for approvals?");

    assert_eq!(parts.len(), 2);
    for part in &parts {
        assert!(!part.trim().is_empty());
        let first = part.split_whitespace().next().unwrap();
        assert!(["What", "Who"].contains(&first), "unexpected fragment: {part}");
    }
}

/// Graph-style retriever that ignores scoping entirely.
struct LeakyGraph;

#[async_trait]
impl AdvancedRetriever for LeakyGraph {
    fn name(&self) -> &str {
        "graph"
    }

    async fn retrieve(&self, _request: &RetrievalRequest) -> Result<RetrievalContext> {
        Ok(RetrievalContext::from_documents(
            "graph",
            vec![
                Document::scoped("ok", "Revenue compared between regions: north led.", "regions.txt", "FINANCE", "acme"),
                Document::scoped("leak", "Patient revenue compared between clinics.", "patients.txt", "MEDICAL", "acme"),
                Document::scoped("tenant", "Other tenant revenue.", "other.txt", "FINANCE", "globex"),
            ],
        ))
    }
}

#[tokio::test]
async fn test_external_strategy_results_are_scope_checked() {
    let (_, store) = q4_store().await;
    let pipeline = AnswerPipeline::builder(BastionConfig::default())
        .store(store)
        .advanced_retriever(Arc::new(LeakyGraph))
        .build()
        .unwrap();

    let answer = pipeline
        .ask_enhanced("Compare revenue between regions", &finance_scope(), &[])
        .await;

    let ids: Vec<&str> = answer
        .reasoning_steps
        .iter()
        .map(|s| s.document_id.as_str())
        .collect();
    assert_eq!(ids, vec!["ok"]);
    assert_eq!(answer.metrics.strategies_used, vec!["graph"]);
    assert_eq!(pipeline.retrieval_metrics().out_of_scope_dropped(), 2);
    assert!(!answer.answer.contains("patients.txt"));
}

struct CountingRewriter {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryRewriter for CountingRewriter {
    async fn rewrite(&self, query: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{query} records"))
    }
}

#[tokio::test]
async fn test_corrective_rewrite_runs_at_most_once() {
    let (_, store) = q4_store().await;
    let rewriter = Arc::new(CountingRewriter {
        calls: AtomicUsize::new(0),
    });
    let pipeline = AnswerPipeline::builder(BastionConfig::default())
        .store(store)
        .rewriter(rewriter.clone())
        .build()
        .unwrap();

    let answer = pipeline
        .ask("What is the legal hold policy?", &CallerScope::new("LEGAL"), &[])
        .await;

    assert_eq!(answer, NO_RECORDS_SENTINEL);
    assert_eq!(rewriter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.retrieval_metrics().corrective_rewrites(), 1);
}

#[tokio::test]
async fn test_fallback_cache_serves_when_store_is_offline() {
    let (backend, store) = q4_store().await;
    let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store).unwrap();

    let online = pipeline
        .ask_enhanced("What was revenue growth?", &finance_scope(), &[])
        .await;
    assert!(online.metrics.answerable);

    backend.set_offline(true);
    let offline = pipeline
        .ask_enhanced("What was revenue growth?", &finance_scope(), &[])
        .await;

    assert!(offline.answer.contains("[Q4.txt]"));
    assert_eq!(pipeline.retrieval_metrics().fallback_cache_hits(), 1);
    assert!(pipeline.retrieval_metrics().strategy_failures() >= 1);

    let other_scope = pipeline
        .ask("What was revenue growth?", &CallerScope::new("MEDICAL"), &[])
        .await;
    assert_eq!(other_scope, NO_RECORDS_SENTINEL);
}

#[tokio::test]
async fn test_active_files_restrict_answers() {
    let (_, store) = q4_store().await;
    store
        .add_documents(vec![Document::scoped(
            "plan",
            "Revenue plan targets 15% growth [plan.txt].",
            "plan.txt",
            "FINANCE",
            "acme",
        )])
        .await
        .unwrap();
    let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store).unwrap();

    let answer = pipeline
        .ask_enhanced("What was revenue growth?", &finance_scope(), &["plan.txt".to_string()])
        .await;

    assert_eq!(answer.sources, vec!["plan.txt"]);
    assert!(answer.reasoning_steps.iter().all(|s| s.source == "plan.txt"));
}

#[tokio::test]
async fn test_pinned_file_found_by_partial_name_among_noise() {
    let store = Arc::new(DocumentStore::new(
        Arc::new(InMemoryMetadataStore::default()),
        Arc::new(MockProvider::new(1024)),
    ));
    let mut docs: Vec<Document> = (0..12)
        .map(|i| {
            Document::scoped(
                format!("noise-{i}"),
                format!("Revenue memo {i}: growth outlook for the division."),
                &format!("memos/memo-{i}.txt"),
                "FINANCE",
                "acme",
            )
        })
        .collect();
    docs.push(Document::scoped(
        "q4",
        "Revenue rose 12% in Q4.",
        "reports/Q4.txt",
        "FINANCE",
        "acme",
    ));
    store.add_documents(docs).await.unwrap();

    let pipeline = AnswerPipeline::from_config(BastionConfig::default(), store).unwrap();
    let answer = pipeline
        .ask_enhanced("What was revenue growth?", &finance_scope(), &["Q4.txt".to_string()])
        .await;

    assert_ne!(answer.answer, NO_RECORDS_SENTINEL);
    assert!(answer.answer.contains("[reports/Q4.txt]"));
    assert_eq!(answer.sources, vec!["reports/Q4.txt"]);
    assert!(answer.metrics.answerable);
    assert!(!answer.answer.contains("memo"));
}
