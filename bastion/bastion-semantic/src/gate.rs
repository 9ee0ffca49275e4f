//! Answerability and citation gate.
//!
//! Decides whether a generated answer may be shown. An answer is shown only
//! when the retrieved documents contain evidence for the question and the
//! answer cites its sources; otherwise it is replaced by excerpts from the
//! documents or by [`NO_RECORDS_SENTINEL`].

use crate::config::GateConfig;
use crate::error::Result;
use crate::generation::TIMEOUT_PLACEHOLDER;
use crate::query::{extract_keywords, is_metric_query, is_relationship_query};
use crate::types::HallucinationResult;
use async_trait::async_trait;
use bastion_core::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Response shown when nothing retrieved supports an answer.
pub const NO_RECORDS_SENTINEL: &str = "No relevant records found.";

/// Label on digests built when no generator could be reached.
pub const OFFLINE_LABEL: &str = "Fallback response (generation unavailable)";

const EXTRACTIVE_HEADER: &str = "Based on the retrieved records:";
const CLOSEST_HEADER: &str = "Closest matching records:";

/// Shortest query word used as an evidence keyword.
const MIN_EVIDENCE_KEYWORD_LEN: usize = 3;
/// Longest excerpt quoted from a single line.
const MAX_EXCERPT_CHARS: usize = 300;

static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[[^\[\]]+\.(?:txt|pdf|docx?|xlsx?|csv|md|pptx?|json|html?)\]")
        .expect("static regex is valid")
});

/// Whole-response "could not find it" phrasings. Only the opening sentence
/// is matched, and it must be the entire response apart from citations.
static NO_INFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(?:",
        r"no\s+relevant\s+(?:records?|information|data|results?)(?:\s+(?:was|were))?\s+found",
        r"|(?:i\s+)?(?:cannot|can't|could\s+not|couldn't|(?:am|was)\s+unable\s+to)\s+(?:find|locate|determine|answer)",
        r"|(?:the\s+)?(?:provided\s+)?(?:documents?|records?|context|sources?)\s+(?:do|does)\s+not\s+(?:contain|mention|include|provide|specify)",
        r"|there\s+is\s+no\s+(?:relevant\s+)?(?:information|mention|data)",
        r"|i\s+(?:don't|do\s+not)\s+know",
        r")(?:[^.!?\n\[]|\[[^\]\n]*\])*[.!?]?\s*$"
    ))
    .expect("static regex is valid")
});

/// External scorer for unsupported claims in a generated answer.
#[async_trait]
pub trait HallucinationDetector: Send + Sync {
    async fn assess(&self, response: &str, evidence: &str, query: &str) -> Result<HallucinationResult>;
}

/// Count of `[name.ext]` citation markers with a known document extension.
pub fn count_citations(text: &str) -> usize {
    CITATION.find_iter(text).count()
}

/// Whether the response is a "could not find it" phrasing.
pub fn is_no_info_response(text: &str) -> bool {
    NO_INFO.is_match(text)
}

/// Digits or metric vocabulary.
fn has_metric_signal(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit()) || is_metric_query(text)
}

/// Keyword-hit threshold for a query with `keyword_count` keywords.
///
/// Never below one: a query without keywords has no evidence.
pub fn evidence_threshold(keyword_count: usize, relationship: bool) -> usize {
    let base = match keyword_count {
        0..=2 => 1,
        3..=5 => 2,
        _ => 3,
    };
    let threshold = if relationship { base + 1 } else { base };
    threshold.min(keyword_count).max(1)
}

/// `line` followed by its `[source]` citation unless it already carries one.
fn cite(line: &str, source: &str) -> String {
    let citation = format!("[{}]", source);
    if line.contains(&citation) {
        line.to_string()
    } else {
        format!("{} {}", line, citation)
    }
}

/// Cells of a table row, or `None` for ordinary lines.
fn table_cells(line: &str) -> Option<Vec<&str>> {
    let separator = if line.contains('|') {
        '|'
    } else if line.contains('\t') {
        '\t'
    } else {
        return None;
    };

    let cells: Vec<&str> = line
        .split(separator)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    (cells.len() >= 2).then_some(cells)
}

fn truncate_excerpt(text: &str) -> String {
    match text.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

/// Per-query view used to judge lines of retrieved text.
#[derive(Debug, Clone)]
struct QueryEvidence {
    keywords: Vec<String>,
    threshold: usize,
    metric: bool,
}

impl QueryEvidence {
    fn new(query: &str) -> Self {
        let keywords = extract_keywords(query, MIN_EVIDENCE_KEYWORD_LEN);
        let threshold = evidence_threshold(keywords.len(), is_relationship_query(query));
        Self {
            keywords,
            threshold,
            metric: is_metric_query(query),
        }
    }

    fn hits(&self, line: &str) -> usize {
        let line = line.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| line.contains(k.as_str()))
            .count()
    }

    /// Whether `line` supports the query at `threshold` keyword hits.
    ///
    /// Metric questions also accept a line with at least one hit and a
    /// number or metric word.
    fn qualifies(&self, line: &str, threshold: usize) -> bool {
        if self.keywords.is_empty() || line.trim().is_empty() {
            return false;
        }
        let hits = self.hits(line);
        hits >= threshold || (self.metric && hits >= 1 && has_metric_signal(line))
    }

    fn has_evidence(&self, documents: &[Document]) -> bool {
        documents
            .iter()
            .flat_map(|d| d.content.lines())
            .any(|line| self.qualifies(line, self.threshold))
    }

    /// The best qualifying line of `document`, projected when it is a table row.
    fn best_line(&self, document: &Document, threshold: usize) -> Option<String> {
        let mut best: Option<(usize, bool, &str)> = None;
        for line in document.content.lines().map(str::trim) {
            if !self.qualifies(line, threshold) {
                continue;
            }
            let rank = (self.hits(line), has_metric_signal(line));
            if best.is_none_or(|(hits, metric, _)| rank > (hits, metric)) {
                best = Some((rank.0, rank.1, line));
            }
        }

        best.map(|(_, _, line)| truncate_excerpt(&self.project(line)))
    }

    /// Keep only the cells of a table row that carry keywords or figures.
    fn project(&self, line: &str) -> String {
        let Some(cells) = table_cells(line) else {
            return line.to_string();
        };

        let kept: Vec<&str> = cells
            .iter()
            .copied()
            .filter(|cell| self.hits(cell) > 0 || has_metric_signal(cell))
            .collect();
        if kept.is_empty() {
            cells.join(" - ")
        } else {
            kept.join(" - ")
        }
    }
}

/// Result of gating one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub response: String,
    pub answerable: bool,
    pub citation_count: usize,
    /// The response shown differs from the one generated.
    pub gate_applied: bool,
    /// The response was assembled from document text.
    pub extractive: bool,
}

impl GateOutcome {
    fn sentinel() -> Self {
        Self {
            response: NO_RECORDS_SENTINEL.to_string(),
            answerable: false,
            citation_count: 0,
            gate_applied: true,
            extractive: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.response == NO_RECORDS_SENTINEL
    }
}

pub struct AnswerGate {
    config: GateConfig,
}

impl AnswerGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether `documents` hold evidence for `query`.
    pub fn has_evidence(&self, query: &str, documents: &[Document]) -> bool {
        QueryEvidence::new(query).has_evidence(documents)
    }

    /// Gate a generated response against the ranked documents.
    pub fn apply(&self, query: &str, response: &str, timed_out: bool, documents: &[Document]) -> GateOutcome {
        let evidence = QueryEvidence::new(query);
        let has_evidence = evidence.has_evidence(documents);
        let generated = response.trim();

        let mut text = generated.to_string();
        let mut extractive = false;

        if !timed_out && has_evidence && count_citations(&text) == 0 {
            if let Some(excerpts) =
                self.excerpts(&evidence, documents, evidence.threshold, EXTRACTIVE_HEADER)
            {
                debug!("Uncited answer replaced with extractive excerpts");
                text = excerpts;
                extractive = true;
            }
        }

        let answerable = has_evidence && !timed_out;

        if !answerable || is_no_info_response(&text) {
            if let Some(excerpts) = self.excerpts(&evidence, documents, 1, CLOSEST_HEADER) {
                text = if timed_out {
                    format!("{}\n\n{}", TIMEOUT_PLACEHOLDER, excerpts)
                } else {
                    excerpts
                };
                extractive = true;
            } else if let Some(line) = has_evidence.then(|| first_line(documents)).flatten() {
                text = line;
                extractive = true;
            } else {
                debug!(timed_out, has_evidence, "No supporting records; abstaining");
                return GateOutcome::sentinel();
            }
        }

        let citation_count = count_citations(&text);
        if answerable && citation_count == 0 {
            debug!("Answer carries no citations; abstaining");
            return GateOutcome::sentinel();
        }

        GateOutcome {
            gate_applied: text != generated,
            response: text,
            answerable,
            citation_count,
            extractive,
        }
    }

    /// Answer built from the documents alone when no generator could be used.
    pub fn offline_digest(&self, query: &str, documents: &[Document]) -> GateOutcome {
        let evidence = QueryEvidence::new(query);
        if !evidence.has_evidence(documents) {
            return GateOutcome::sentinel();
        }

        let Some(excerpts) = self.excerpts(&evidence, documents, 1, OFFLINE_LABEL) else {
            return GateOutcome::sentinel();
        };

        let citation_count = count_citations(&excerpts);
        if citation_count == 0 {
            return GateOutcome::sentinel();
        }

        GateOutcome {
            response: excerpts,
            answerable: true,
            citation_count,
            gate_applied: true,
            extractive: true,
        }
    }

    /// Numbered, cited best lines, one per document, up to `max_excerpts`.
    fn excerpts(
        &self,
        evidence: &QueryEvidence,
        documents: &[Document],
        threshold: usize,
        header: &str,
    ) -> Option<String> {
        let lines: Vec<String> = documents
            .iter()
            .filter_map(|doc| {
                evidence
                    .best_line(doc, threshold)
                    .map(|line| cite(&line, doc.source()))
            })
            .take(self.config.max_excerpts)
            .collect();

        if lines.is_empty() {
            return None;
        }

        let mut out = header.to_string();
        for (i, line) in lines.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, line));
        }
        Some(out)
    }
}

impl Default for AnswerGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

/// First non-empty line of the top-ranked document that has one, cited.
fn first_line(documents: &[Document]) -> Option<String> {
    documents.iter().find_map(|doc| {
        doc.content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|line| cite(&truncate_excerpt(line), doc.source()))
    })
}
