//! Command implementations for the Bastion CLI.
//!
//! Each command renders its output to a string so the binary stays a thin
//! dispatcher.

use crate::corpus::{self, CorpusEntry};
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use bastion_core::filter::{self, ParseResult};
use bastion_core::{CallerScope, DocumentId};
use bastion_semantic::{
    AnswerPipeline, BastionConfig, DocumentStore, EmbeddingProvider, EnhancedAnswer,
    InMemoryMetadataStore, ProviderManager,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Load configuration from `path`, or defaults plus environment overrides.
pub async fn load_config(path: Option<&Path>) -> Result<BastionConfig> {
    match path {
        Some(path) => BastionConfig::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = BastionConfig::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }
}

/// In-memory store loaded with the corpus at `corpus_path`.
pub async fn build_store(config: &BastionConfig, corpus_path: &Path) -> Result<Arc<DocumentStore>> {
    let entries = corpus::read_corpus(corpus_path).await?;
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(
        ProviderManager::from_config(&config.embedding)
            .await
            .context("Failed to initialize embedding provider")?,
    );

    let backend = Arc::new(InMemoryMetadataStore::new(
        config.retrieval.indexed_fields.iter().cloned(),
    ));
    let store = Arc::new(DocumentStore::new(backend, provider));
    let added = store
        .add_documents(corpus::to_documents(&entries))
        .await
        .context("Failed to index corpus")?;

    info!(documents = added, "Loaded corpus from {}", corpus_path.display());
    Ok(store)
}

pub fn caller_scope(department: &str, workspace: Option<&str>) -> CallerScope {
    match workspace {
        Some(workspace) => CallerScope::new(department).with_workspace(workspace),
        None => CallerScope::new(department),
    }
}

pub async fn ask(
    config: BastionConfig,
    corpus_path: &Path,
    query: &str,
    scope: &CallerScope,
    files: &[String],
    enhanced: bool,
    format: OutputFormat,
) -> Result<String> {
    let store = build_store(&config, corpus_path).await?;
    let pipeline = AnswerPipeline::from_config(config, store)?;

    if !enhanced && format != OutputFormat::Json {
        return Ok(pipeline.ask(query, scope, files).await);
    }

    let answer = pipeline.ask_enhanced(query, scope, files).await;
    render_answer(&answer, format)
}

pub fn render_answer(answer: &EnhancedAnswer, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return output::to_json(answer);
    }

    let mut out = answer.answer.clone();
    out.push_str("\n\nSources:");
    if answer.sources.is_empty() {
        out.push_str(" none");
    }
    for source in &answer.sources {
        out.push_str(&format!("\n  - {}", source));
    }

    let m = &answer.metrics;
    out.push_str(&format!(
        "\n\nanswerable: {}  citations: {}  gate applied: {}  documents: {}  latency: {}ms",
        m.answerable, m.citation_count, m.gate_applied, m.documents_retrieved, m.latency_ms
    ));
    if !m.strategies_used.is_empty() {
        out.push_str(&format!("\nstrategies: {}", m.strategies_used.join(", ")));
    }
    Ok(out)
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub source: String,
    pub score: f64,
    pub content: String,
}

/// Raw similarity search with an optional filter expression.
pub async fn search(
    config: BastionConfig,
    corpus_path: &Path,
    query: &str,
    filter_text: Option<&str>,
    top_k: usize,
    format: OutputFormat,
) -> Result<String> {
    let store = build_store(&config, corpus_path).await?;
    let hits: Vec<SearchHit> = store
        .similarity_search(
            query,
            top_k,
            config.retrieval.similarity_threshold,
            filter_text,
        )
        .await?
        .into_iter()
        .map(|doc| SearchHit {
            source: doc.source().to_string(),
            score: doc.score(),
            id: doc.id,
            content: doc.content,
        })
        .collect();

    debug!(hits = hits.len(), "Search complete");

    if format == OutputFormat::Json {
        return output::to_json(&hits);
    }
    if hits.is_empty() {
        return Ok("No results found".to_string());
    }

    let lines: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. [{:.3}] {} ({}): {}", i + 1, hit.score, hit.id, hit.source, hit.content))
        .collect();
    Ok(lines.join("\n"))
}

/// Parse a filter expression and show its canonical form.
pub fn parse_filter(expression: &str, format: OutputFormat) -> Result<String> {
    let result = filter::parse(Some(expression));

    if format == OutputFormat::Json {
        let value = match &result {
            ParseResult::NoFilter => json!({ "status": "no_filter" }),
            ParseResult::Invalid => json!({ "status": "invalid" }),
            ParseResult::Valid(parsed) => json!({
                "status": "valid",
                "canonical": parsed.to_string(),
                "or_groups": parsed.or_groups(),
            }),
        };
        return output::to_json(&value);
    }

    Ok(match result {
        ParseResult::NoFilter => "no filter".to_string(),
        ParseResult::Invalid => "invalid filter".to_string(),
        ParseResult::Valid(parsed) => {
            let groups = parsed.or_groups().len();
            format!("valid ({} OR-group{}): {}", groups, if groups == 1 { "" } else { "s" }, parsed)
        }
    })
}

/// Delete documents by id and rewrite the corpus without them.
pub async fn delete(
    config: BastionConfig,
    corpus_path: &Path,
    ids: &[DocumentId],
    format: OutputFormat,
) -> Result<String> {
    let store = build_store(&config, corpus_path).await?;
    let outcome = store.delete(ids).await;

    if outcome == Some(true) {
        let entries = corpus::read_corpus(corpus_path).await?;
        let remaining: Vec<CorpusEntry> = entries
            .iter()
            .enumerate()
            .filter(|(i, entry)| !ids.contains(&entry.document_id(*i)))
            .map(|(_, entry)| entry.clone())
            .collect();
        corpus::write_corpus(corpus_path, &remaining).await?;
        info!(removed = entries.len() - remaining.len(), "Rewrote corpus");
    }

    if format == OutputFormat::Json {
        return output::to_json(&json!({ "deleted": outcome, "remaining": store.len() }));
    }

    Ok(match outcome {
        Some(true) => format!("Deleted. {} documents remain.", store.len()),
        Some(false) => "Nothing deleted.".to_string(),
        None => "Delete failed; see logs.".to_string(),
    })
}
