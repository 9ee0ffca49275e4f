//! Filter-expression language used to scope every store query.
//!
//! Two textual forms are accepted:
//!
//! - A simple boolean grammar: `expr := group ("||" group)*`,
//!   `group := cond ("&&" cond)*`, `cond := key op value | key "in" "[" values "]"`.
//!   There are no parentheses and no negation beyond `!=`; `&&` binds
//!   tighter than `||`.
//! - A structured rendering:
//!   `Expression[type=EQ, left=Key[key=K], right=Value[value=V]]`,
//!   comma-joined into a single AND group.
//!
//! Parsing is total: every input maps to [`ParseResult::NoFilter`],
//! [`ParseResult::Valid`] or [`ParseResult::Invalid`], and callers must treat
//! `Invalid` as "match nothing". Only the exact operator tokens carry meaning;
//! all other characters are literal data.

mod builder;
mod eval;
mod lexer;
mod parser;
mod structured;

use serde::Serialize;
use std::fmt;

pub use builder::FilterBuilder;
pub use eval::evaluate;

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    Gte,
    Lte,
    Gt,
    Lt,
}

impl FilterOp {
    /// Token used for this operator in the simple grammar.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::In => "in",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Self::Gte | Self::Lte | Self::Gt | Self::Lt)
    }

    pub(crate) fn from_structured(name: &str) -> Option<Self> {
        match name {
            "EQ" => Some(Self::Eq),
            "NE" => Some(Self::Ne),
            "IN" => Some(Self::In),
            "GTE" => Some(Self::Gte),
            "LTE" => Some(Self::Lte),
            "GT" => Some(Self::Gt),
            "LT" => Some(Self::Lt),
            _ => None,
        }
    }
}

/// One `key op value(s)` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub key: String,
    pub op: FilterOp,
    /// One value for scalar operators, one or more for `in`.
    pub values: Vec<String>,
}

impl Condition {
    pub fn new(key: impl Into<String>, op: FilterOp, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            op,
            values,
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, FilterOp::Eq, vec![value.into()])
    }

    fn is_well_formed(&self) -> bool {
        if self.key.is_empty() || self.values.is_empty() {
            return false;
        }
        self.op == FilterOp::In || self.values.len() == 1
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            FilterOp::In => {
                write!(f, "{} in [", self.key)?;
                for (i, value) in self.values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, value)?;
                }
                f.write_str("]")
            }
            op => {
                write!(f, "{} {} ", self.key, op.symbol())?;
                match self.values.first() {
                    Some(value) => write_quoted(f, value),
                    None => f.write_str("''"),
                }
            }
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    let quote = if value.contains('\'') { '"' } else { '\'' };
    write!(f, "{quote}{value}{quote}")
}

/// A successfully parsed filter in disjunctive normal form.
///
/// Every group holds at least one condition and every condition at least one
/// value; the constructor refuses anything else so an empty group can never
/// silently match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedFilter {
    or_groups: Vec<Vec<Condition>>,
}

impl ParsedFilter {
    pub fn new(or_groups: Vec<Vec<Condition>>) -> Option<Self> {
        let well_formed = !or_groups.is_empty()
            && or_groups
                .iter()
                .all(|group| !group.is_empty() && group.iter().all(Condition::is_well_formed));
        well_formed.then_some(Self { or_groups })
    }

    /// Single AND group.
    pub fn all_of(conditions: Vec<Condition>) -> Option<Self> {
        Self::new(vec![conditions])
    }

    pub fn or_groups(&self) -> &[Vec<Condition>] {
        &self.or_groups
    }

    /// All conditions across all groups.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.or_groups.iter().flatten()
    }

    pub fn matches(&self, metadata: &crate::types::Metadata) -> bool {
        evaluate(metadata, self)
    }
}

impl fmt::Display for ParsedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (g, group) in self.or_groups.iter().enumerate() {
            if g > 0 {
                f.write_str(" || ")?;
            }
            for (c, condition) in group.iter().enumerate() {
                if c > 0 {
                    f.write_str(" && ")?;
                }
                write!(f, "{condition}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// Absent, empty or whitespace-only input.
    NoFilter,
    Valid(ParsedFilter),
    /// Malformed input. Callers must return no documents.
    Invalid,
}

impl ParseResult {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn as_filter(&self) -> Option<&ParsedFilter> {
        match self {
            Self::Valid(filter) => Some(filter),
            _ => None,
        }
    }

    /// Whether `metadata` passes this filter. `NoFilter` passes everything,
    /// `Invalid` passes nothing.
    pub fn admits(&self, metadata: &crate::types::Metadata) -> bool {
        match self {
            Self::NoFilter => true,
            Self::Valid(filter) => evaluate(metadata, filter),
            Self::Invalid => false,
        }
    }
}

const STRUCTURED_PREFIX: &str = "Expression[";

/// Parse a filter expression.
pub fn parse(input: Option<&str>) -> ParseResult {
    let Some(text) = input.map(str::trim).filter(|t| !t.is_empty()) else {
        return ParseResult::NoFilter;
    };

    let parsed = if text.starts_with(STRUCTURED_PREFIX) {
        structured::parse_structured(text)
    } else {
        lexer::tokenize(text).and_then(|tokens| parser::parse_tokens(&tokens))
    };

    match parsed {
        Some(filter) => ParseResult::Valid(filter),
        None => {
            tracing::debug!(len = text.len(), "Rejected malformed filter expression");
            ParseResult::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(input: &str) -> ParsedFilter {
        match parse(Some(input)) {
            ParseResult::Valid(filter) => filter,
            other => panic!("expected valid filter for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_no_filter() {
        assert_eq!(parse(None), ParseResult::NoFilter);
        assert_eq!(parse(Some("")), ParseResult::NoFilter);
        assert_eq!(parse(Some("   \t\n")), ParseResult::NoFilter);
    }

    #[test]
    fn test_single_condition() {
        let filter = valid("department == 'FINANCE'");
        assert_eq!(
            filter.or_groups(),
            &[vec![Condition::eq("department", "FINANCE")]]
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let filter = valid("a == '1' && b == '2' || c == '3'");
        assert_eq!(filter.or_groups().len(), 2);
        assert_eq!(filter.or_groups()[0].len(), 2);
        assert_eq!(filter.or_groups()[1], vec![Condition::eq("c", "3")]);
    }

    #[test]
    fn test_in_list() {
        let filter = valid("source in ['a.txt', \"b.pdf\", c.md] && department == 'X'");
        let first = &filter.or_groups()[0][0];
        assert_eq!(first.op, FilterOp::In);
        assert_eq!(first.values, vec!["a.txt", "b.pdf", "c.md"]);

        let filter = valid("source IN ['a.txt']");
        assert_eq!(filter.or_groups()[0][0].op, FilterOp::In);
    }

    #[test]
    fn test_range_operators() {
        let filter = valid("page >= 3 && page < 10 && year <= 2024 && n > 1 && x != 'y'");
        let ops: Vec<FilterOp> = filter.conditions().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                FilterOp::Gte,
                FilterOp::Lt,
                FilterOp::Lte,
                FilterOp::Gt,
                FilterOp::Ne
            ]
        );
    }

    #[test]
    fn test_injection_attempts_are_invalid() {
        assert!(parse(Some("department == 'FINANCE' OR 1=1")).is_invalid());
        assert!(parse(Some("department == 'FINANCE' -- comment")).is_invalid());
        assert!(parse(Some("department == 'FINANCE'; DROP TABLE docs")).is_invalid());
        assert!(parse(Some("department == 'FINANCE' ||")).is_invalid());
        assert!(parse(Some("&& department == 'FINANCE'")).is_invalid());
        assert!(parse(Some("department == ")).is_invalid());
        assert!(parse(Some("department 'FINANCE'")).is_invalid());
        assert!(parse(Some("x in []")).is_invalid());
        assert!(parse(Some("x in ['a',]")).is_invalid());
        assert!(parse(Some("x in ['a'")).is_invalid());
    }

    #[test]
    fn test_injection_inside_quotes_is_literal() {
        let filter = valid("department == 'FINANCE || 1 == 1'");
        assert_eq!(filter.conditions().count(), 1);
        assert_eq!(
            filter.or_groups()[0][0].values,
            vec!["FINANCE || 1 == 1".to_string()]
        );
    }

    #[test]
    fn test_quoted_key_keeps_quotes() {
        let filter = valid("'1' == '1'");
        assert_eq!(filter.or_groups()[0][0].key, "'1'");
    }

    #[test]
    fn test_structured_form() {
        let filter = valid(
            "Expression[type=EQ, left=Key[key=department], right=Value[value=FINANCE]], \
             Expression[type=IN, left=Key[key=source], right=Value[value=[a.txt, 'b.txt']]]",
        );
        assert_eq!(filter.or_groups().len(), 1);
        let group = &filter.or_groups()[0];
        assert_eq!(group[0], Condition::eq("department", "FINANCE"));
        assert_eq!(group[1].op, FilterOp::In);
        assert_eq!(group[1].values, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_structured_malformed() {
        assert!(parse(Some("Expression[type=EQ, left=Key[key=a]]")).is_invalid());
        assert!(
            parse(Some(
                "Expression[type=LIKE, left=Key[key=a], right=Value[value=b]]"
            ))
            .is_invalid()
        );
        assert!(
            parse(Some(
                "Expression[type=EQ, left=Key[key=a], right=Value[value=b]] trailing"
            ))
            .is_invalid()
        );
    }

    #[test]
    fn test_display_reparses_to_same_filter() {
        let filter = valid("department == 'FINANCE' && source in ['a.txt', \"it's.md\"] || page >= 3");
        let rendered = filter.to_string();
        assert_eq!(valid(&rendered), filter);
    }

    #[test]
    fn test_parsed_filter_rejects_empty_groups() {
        assert!(ParsedFilter::new(vec![]).is_none());
        assert!(ParsedFilter::new(vec![vec![]]).is_none());
        assert!(ParsedFilter::new(vec![vec![Condition::new("k", FilterOp::Eq, vec![])]]).is_none());
        assert!(ParsedFilter::all_of(vec![Condition::eq("k", "v")]).is_some());
    }

    #[test]
    fn test_admits() {
        let mut metadata = crate::types::Metadata::new();
        metadata.insert("department".into(), "FINANCE".into());

        assert!(ParseResult::NoFilter.admits(&metadata));
        assert!(!ParseResult::Invalid.admits(&metadata));
        assert!(parse(Some("department == 'FINANCE'")).admits(&metadata));
        assert!(!parse(Some("department == 'MEDICAL'")).admits(&metadata));
    }
}
