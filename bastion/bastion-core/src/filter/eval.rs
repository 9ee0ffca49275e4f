//! In-memory evaluation of a parsed filter against document metadata.

use super::{Condition, FilterOp, ParsedFilter};
use crate::types::Metadata;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

/// Whether `metadata` satisfies `filter`.
///
/// A missing or null field never satisfies a condition, including `!=`.
/// Equality compares numerically only against JSON number fields; string
/// fields match by exact text, so `"01"` never equals `'1'`. Array fields
/// match when any element does. Range operators only hold between numbers.
pub fn evaluate(metadata: &Metadata, filter: &ParsedFilter) -> bool {
    filter
        .or_groups()
        .iter()
        .any(|group| group.iter().all(|condition| condition_holds(metadata, condition)))
}

fn condition_holds(metadata: &Metadata, condition: &Condition) -> bool {
    let Some(field) = metadata.get(&condition.key).filter(|v| !v.is_null()) else {
        return false;
    };

    match condition.op {
        FilterOp::Eq => condition
            .values
            .first()
            .is_some_and(|value| field_equals(field, value)),
        FilterOp::Ne => condition
            .values
            .first()
            .is_some_and(|value| !field_equals(field, value)),
        FilterOp::In => condition
            .values
            .iter()
            .any(|value| field_equals(field, value)),
        op => condition
            .values
            .first()
            .is_some_and(|value| range_holds(field, value, op)),
    }
}

fn field_equals(field: &Value, value: &str) -> bool {
    match field {
        Value::Array(items) => items.iter().any(|item| scalar_equals(item, value)),
        other => scalar_equals(other, value),
    }
}

fn scalar_equals(field: &Value, value: &str) -> bool {
    if field.is_number() {
        if let (Some(a), Some(b)) = (as_number(field), parse_number(value)) {
            return a == b;
        }
    }
    scalar_text(field).is_some_and(|text| text == value)
}

fn range_holds(field: &Value, value: &str, op: FilterOp) -> bool {
    let (Some(a), Some(b)) = (as_number(field), parse_number(value)) else {
        return false;
    };
    let Some(ordering) = a.partial_cmp(&b) else {
        return false;
    };
    match op {
        FilterOp::Gte => ordering != Ordering::Less,
        FilterOp::Lte => ordering != Ordering::Greater,
        FilterOp::Gt => ordering == Ordering::Greater,
        FilterOp::Lt => ordering == Ordering::Less,
        _ => false,
    }
}

fn scalar_text(field: &Value) -> Option<Cow<'_, str>> {
    match field {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        _ => None,
    }
}

fn as_number(field: &Value) -> Option<f64> {
    match field {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok().filter(|f| f.is_finite())
}
