//! Query analysis: compound-question decomposition, keywords and lexical
//! weights.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "may", "might", "can", "this",
        "that", "these", "those", "what", "which", "who", "when", "where", "why", "how", "me",
        "my", "we", "our", "you", "your", "it", "its", "i", "there", "their", "they", "them",
        "about", "into", "than", "then", "also", "any", "all", "some", "tell", "show", "give",
        "list", "explain", "describe", "please", "not", "no", "so", "if", "whom", "whose",
    ]
    .into_iter()
    .collect()
});

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "where", "when", "how", "why", "which", "tell", "show", "explain",
    "describe", "list", "is", "are", "does", "do", "can", "did",
];

/// `and` followed by a question word starts a new question.
static QUESTION_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\band\s+(what|who|where|when|how|why|tell|show|explain|describe|list)\b")
        .expect("static regex is valid")
});

static CONJUNCTIVE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:and\s+(?:what|who|where|when|how|why)|as\s+well\s+as|along\s+with|in\s+addition\s+to|and\s+also)\b")
        .expect("static regex is valid")
});

static RELATIONSHIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(compare[ds]?|comparison|versus|vs|relationship|related|relate[ds]?|between|differences?|differ|impacts?|affects?|correlat\w*|connections?|connected|linked|depend\w*)\b")
        .expect("static regex is valid")
});

static METRIC_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bhow\s+(?:much|many)\b|\b(?:revenue|growth|rate|percent(?:age)?|total|amount|number|count|average|cost|costs|price|profit|margin|budget|sales|increase|decrease|figures?|metrics?|kpis?|spend|spending|income|earnings|ratio)\b|%)")
        .expect("static regex is valid")
});

/// Whether `word` (lowercase) is a stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// Lowercased, deduplicated, non-stop-word terms of at least `min_len` chars,
/// in first-seen order.
pub fn extract_keywords(text: &str, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= min_len && !is_stop_word(word))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Adjacent word pairs where neither word is a stop word, lowercased.
pub fn query_bigrams(text: &str) -> Vec<String> {
    let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
    let mut seen = HashSet::new();
    words
        .windows(2)
        .filter(|pair| !is_stop_word(&pair[0]) && !is_stop_word(&pair[1]))
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .filter(|bigram| seen.insert(bigram.clone()))
        .collect()
}

/// Term-frequency weights over non-stop-word terms, summing to 1.0.
pub fn sparse_weights(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    let mut total = 0.0f32;
    for word in text.unicode_words().map(str::to_lowercase) {
        if word.chars().count() < 2 || is_stop_word(&word) {
            continue;
        }
        *counts.entry(word).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        counts.values_mut().for_each(|w| *w /= total);
    }
    counts
}

pub fn token_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Comparison or relationship language ("compare", "between", "impact", ...).
pub fn is_relationship_query(text: &str) -> bool {
    RELATIONSHIP.is_match(text)
}

/// Whether the query asks for a number, amount or metric.
pub fn is_metric_query(text: &str) -> bool {
    METRIC_QUERY.is_match(text)
}

/// Splits compound questions into independently answerable sub-queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryDecomposer;

impl QueryDecomposer {
    pub fn new() -> Self {
        Self
    }

    pub fn is_compound_query(&self, text: &str) -> bool {
        CONJUNCTIVE_MARKER.is_match(text) || QUESTION_BOUNDARY.is_match(text)
    }

    /// Split `text` into sub-queries. Returns `[text]` when it is not
    /// compound or no split yields at least two usable fragments.
    pub fn decompose(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if !self.is_compound_query(text) {
            return vec![text.to_string()];
        }

        let prefix = question_prefix(text);

        let fragments = split_on_question_boundaries(text);
        let usable = finish_fragments(fragments, prefix);
        if usable.len() >= 2 {
            return usable;
        }

        if let Some(marker) = CONJUNCTIVE_MARKER.find(text) {
            let fragments = vec![&text[..marker.start()], &text[marker.end()..]];
            let usable = finish_fragments(fragments, prefix);
            if usable.len() >= 2 {
                return usable;
            }
        }

        vec![text.to_string()]
    }
}

/// Cut before each `and <question word>`, dropping the `and`.
fn split_on_question_boundaries(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut start = 0;
    for caps in QUESTION_BOUNDARY.captures_iter(text) {
        let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        fragments.push(&text[start..whole.start()]);
        start = word.start();
    }
    fragments.push(&text[start..]);
    fragments
}

fn finish_fragments(fragments: Vec<&str>, prefix: &str) -> Vec<String> {
    fragments
        .into_iter()
        .map(|fragment| fragment.trim().trim_end_matches([',', ';']).trim())
        .filter(|fragment| fragment.chars().count() > 5)
        .map(|fragment| {
            if starts_with_question_word(fragment) {
                capitalize(fragment)
            } else {
                format!("{} {}", prefix, fragment)
            }
        })
        .collect()
}

fn starts_with_question_word(fragment: &str) -> bool {
    fragment
        .unicode_words()
        .next()
        .is_some_and(|word| QUESTION_WORDS.contains(&word.to_lowercase().as_str()))
}

/// Prefix for fragments that lost their question word, inferred from the
/// original query's leading word.
fn question_prefix(text: &str) -> &'static str {
    let first = text
        .unicode_words()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();
    match first.as_str() {
        "who" => "Who is",
        "where" => "Where is",
        "when" => "When is",
        "how" => "How is",
        "why" => "Why is",
        "tell" => "Tell me about",
        "show" => "Show",
        "explain" => "Explain",
        "describe" => "Describe",
        "list" => "List",
        _ => "What is",
    }
}

fn capitalize(fragment: &str) -> String {
    let mut chars = fragment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
