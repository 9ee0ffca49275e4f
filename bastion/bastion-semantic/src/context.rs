//! Prompt context assembly under character budgets.
//!
//! The output is a sequence of blocks separated by the configured delimiter:
//! an optional overview block labeled as non-citable, then one block per
//! ranked document headed by its `[filename]` marker. Budgets are counted in
//! characters and assembly degrades to a shorter (possibly empty) context
//! instead of failing.

pub use crate::config::ContextConfig;
use bastion_core::Document;
use serde::Serialize;

/// Label placed above the overview block.
pub const OVERVIEW_LABEL: &str = "[OVERVIEW - CONTEXT ONLY, DO NOT CITE]";

/// Result of context assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Sources of the documents included, in order.
    pub sources: Vec<String>,
    pub documents_included: usize,
    /// Whether anything was cut or left out for budget reasons.
    pub truncated: bool,
}

pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn build_information(&self, ranked: &[Document], global_context: Option<&str>) -> String {
        self.assemble(ranked, global_context).text
    }

    pub fn assemble(&self, ranked: &[Document], global_context: Option<&str>) -> AssembledContext {
        let config = &self.config;
        let delimiter_len = config.delimiter.chars().count();
        let mut out = AssembledContext::default();
        let mut used = 0usize;

        if let Some(global) = global_context.map(str::trim).filter(|g| !g.is_empty()) {
            let header_len = OVERVIEW_LABEL.chars().count() + 1;
            let cap = config
                .global_budget
                .min(config.total_budget)
                .saturating_sub(header_len);
            if cap > 0 {
                let (body, cut) = truncate_chars(global, cap);
                out.truncated |= cut;
                out.text.push_str(OVERVIEW_LABEL);
                out.text.push('\n');
                out.text.push_str(body);
                used += header_len + body.chars().count();
            } else {
                out.truncated = true;
            }
        }

        for doc in ranked {
            if out.documents_included >= config.max_documents {
                out.truncated = true;
                break;
            }

            let separator = if out.text.is_empty() { 0 } else { delimiter_len };
            let header = format!("[{}]\n", doc.source());
            let header_len = header.chars().count();

            let remaining = config
                .total_budget
                .saturating_sub(used + separator + header_len);
            if remaining == 0 {
                out.truncated = true;
                break;
            }

            let (body, cut) = truncate_chars(&doc.content, config.per_document_cap.min(remaining));
            out.truncated |= cut;

            if separator > 0 {
                out.text.push_str(&config.delimiter);
            }
            out.text.push_str(&header);
            out.text.push_str(body);
            used += separator + header_len + body.chars().count();

            out.sources.push(doc.source().to_string());
            out.documents_included += 1;
        }

        out
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

/// Longest prefix of at most `max_chars` characters, and whether it was cut.
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
