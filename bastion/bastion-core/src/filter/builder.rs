//! Builds filter text from a caller scope.
//!
//! Retrieval never splices user input into filter text directly; it goes
//! through this builder, which refuses keys that are not plain words and
//! values that cannot be quoted unambiguously.

use super::lexer::Token;
use crate::types::{CallerScope, META_DEPARTMENT, META_WORKSPACE};

#[derive(Debug, Clone)]
enum Clause {
    Eq(String, String),
    AnyOf(String, Vec<String>),
}

/// Incremental builder for scoped filter expressions.
///
/// The result is a disjunction of `base && alternative` groups when
/// alternatives were added, or a single `base` group otherwise.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    base: Vec<Clause>,
    alternatives: Vec<Clause>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the caller's department and, if present, workspace.
    pub fn for_scope(scope: &CallerScope) -> Self {
        let builder = Self::new().eq(META_DEPARTMENT, &scope.department);
        match &scope.workspace_id {
            Some(workspace) => builder.eq(META_WORKSPACE, workspace),
            None => builder,
        }
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base.push(Clause::Eq(key.into(), value.into()));
        self
    }

    pub fn any_of<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.base.push(Clause::AnyOf(key.into(), values));
        self
    }

    /// Add an alternative `key in [values]` clause, OR-ed with the others.
    pub fn or_any_of<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.alternatives.push(Clause::AnyOf(key.into(), values));
        self
    }

    /// Render the filter text, or `None` if any key or value cannot be
    /// expressed safely.
    pub fn build(&self) -> Option<String> {
        let base = self
            .base
            .iter()
            .map(render_clause)
            .collect::<Option<Vec<_>>>()?;

        if self.alternatives.is_empty() {
            return (!base.is_empty()).then(|| base.join(" && "));
        }

        let mut groups = Vec::with_capacity(self.alternatives.len());
        for alternative in &self.alternatives {
            let mut group = base.clone();
            group.push(render_clause(alternative)?);
            groups.push(group.join(" && "));
        }
        Some(groups.join(" || "))
    }
}

fn render_clause(clause: &Clause) -> Option<String> {
    match clause {
        Clause::Eq(key, value) => Some(format!("{} == {}", safe_key(key)?, quote(value)?)),
        Clause::AnyOf(key, values) => {
            if values.is_empty() {
                return None;
            }
            let quoted = values.iter().map(|v| quote(v)).collect::<Option<Vec<_>>>()?;
            Some(format!("{} in [{}]", safe_key(key)?, quoted.join(", ")))
        }
    }
}

fn safe_key(key: &str) -> Option<&str> {
    let tokens = super::lexer::tokenize(key)?;
    match tokens.as_slice() {
        [Token::Word(word)] if word == key && !word.eq_ignore_ascii_case("in") => Some(key),
        _ => None,
    }
}

fn quote(value: &str) -> Option<String> {
    if !value.contains('\'') {
        Some(format!("'{value}'"))
    } else if !value.contains('"') {
        Some(format!("\"{value}\""))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::{parse, Condition, FilterOp, ParseResult};
    use super::*;

    #[test]
    fn test_scope_filter() {
        let scope = CallerScope::new("FINANCE").with_workspace("ws-1");
        let text = FilterBuilder::for_scope(&scope).build().unwrap();
        assert_eq!(text, "department == 'FINANCE' && workspaceId == 'ws-1'");
    }

    #[test]
    fn test_file_alternatives() {
        let scope = CallerScope::new("FINANCE");
        let text = FilterBuilder::for_scope(&scope)
            .or_any_of("source", ["Q4.txt", "plan.pdf"])
            .or_any_of("filename", ["Q4.txt", "plan.pdf"])
            .build()
            .unwrap();

        let ParseResult::Valid(filter) = parse(Some(&text)) else {
            panic!("builder output must parse: {text}");
        };
        assert_eq!(filter.or_groups().len(), 2);
        assert_eq!(filter.or_groups()[0][0], Condition::eq("department", "FINANCE"));
        assert_eq!(filter.or_groups()[1][1].key, "filename");
        assert_eq!(filter.or_groups()[1][1].op, FilterOp::In);
    }

    #[test]
    fn test_hostile_values_stay_literal() {
        let scope = CallerScope::new("FINANCE' || department == 'MEDICAL");
        let text = FilterBuilder::for_scope(&scope).build().unwrap();

        let ParseResult::Valid(filter) = parse(Some(&text)) else {
            panic!("builder output must parse: {text}");
        };
        assert_eq!(filter.or_groups().len(), 1);
        assert_eq!(
            filter.or_groups()[0][0].values,
            vec!["FINANCE' || department == 'MEDICAL".to_string()]
        );
    }

    #[test]
    fn test_unquotable_value_is_refused() {
        let scope = CallerScope::new("it's \"odd\"");
        assert!(FilterBuilder::for_scope(&scope).build().is_none());
    }

    #[test]
    fn test_unsafe_keys_are_refused() {
        assert!(FilterBuilder::new().eq("a == b", "x").build().is_none());
        assert!(FilterBuilder::new().eq("", "x").build().is_none());
        assert!(FilterBuilder::new().eq("in", "x").build().is_none());
        assert!(FilterBuilder::new().any_of("k", Vec::<String>::new()).build().is_none());
        assert!(FilterBuilder::new().build().is_none());
    }
}
