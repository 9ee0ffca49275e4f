//! Keyword boosting and the deterministic final ordering.

use crate::query::{extract_keywords, query_bigrams};
use bastion_core::Document;
use std::cmp::Ordering;

/// Score added per query bigram found verbatim in the content.
pub const BIGRAM_BOOST: f64 = 0.5;
/// Maximum score added for individual keyword coverage.
pub const KEYWORD_BOOST: f64 = 0.2;
/// Shortest keyword that counts toward coverage.
pub const MIN_KEYWORD_LEN: usize = 4;

/// Add phrase and keyword bonuses to each document's existing score.
pub fn apply_keyword_boost(documents: &mut [Document], query: &str) {
    let bigrams = query_bigrams(query);
    let keywords = extract_keywords(query, MIN_KEYWORD_LEN);
    if bigrams.is_empty() && keywords.is_empty() {
        return;
    }

    for doc in documents.iter_mut() {
        let content = doc.content.to_lowercase();

        let phrase_hits = bigrams.iter().filter(|b| content.contains(b.as_str())).count();
        let keyword_hits = keywords.iter().filter(|k| content.contains(k.as_str())).count();

        let mut bonus = BIGRAM_BOOST * phrase_hits as f64;
        if !keywords.is_empty() {
            bonus += KEYWORD_BOOST * keyword_hits as f64 / keywords.len() as f64;
        }

        if bonus > 0.0 {
            let score = doc.score() + bonus;
            doc.set_score(score);
        }
    }
}

/// Total order: score descending, then case-insensitive source, then id.
pub fn compare_documents(a: &Document, b: &Document) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.source().to_lowercase().cmp(&b.source().to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_documents_deterministically(documents: &mut [Document]) {
    documents.sort_by(compare_documents);
}

/// Boost (optionally) and sort.
pub fn rank_documents(mut documents: Vec<Document>, query: &str, keyword_boost: bool) -> Vec<Document> {
    if keyword_boost {
        apply_keyword_boost(&mut documents, query);
    }
    sort_documents_deterministically(&mut documents);
    documents
}
