//! Parser for the structured `Expression[...]` rendering.
//!
//! Each expression has the exact shape
//! `Expression[type=T, left=Key[key=K], right=Value[value=V]]`; expressions
//! are separated by commas and combined with AND. Any deviation is rejected.

use super::{Condition, FilterOp, ParsedFilter};

const OPEN: &str = "Expression[type=";
const KEY: &str = ", left=Key[key=";
const VALUE: &str = "], right=Value[value=";

pub(crate) fn parse_structured(input: &str) -> Option<ParsedFilter> {
    let mut rest = input.trim();
    let mut group = Vec::new();

    loop {
        let (condition, remaining) = parse_expression(rest)?;
        group.push(condition);

        rest = remaining.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(',')?.trim_start();
    }

    ParsedFilter::all_of(group)
}

fn parse_expression(input: &str) -> Option<(Condition, &str)> {
    let rest = input.strip_prefix(OPEN)?;
    let (type_name, rest) = rest.split_once(KEY)?;
    let op = FilterOp::from_structured(type_name.trim())?;

    let (key, rest) = rest.split_once(VALUE)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let (values, rest) = if op == FilterOp::In && rest.starts_with('[') {
        let end = rest.find("]]]")?;
        let values = rest[1..end]
            .split(',')
            .map(|v| unquote(v.trim()))
            .collect::<Option<Vec<_>>>()?;
        (values, &rest[end + 3..])
    } else {
        let end = rest.find("]]")?;
        (vec![unquote(rest[..end].trim())?], &rest[end + 2..])
    };

    Some((Condition::new(key, op, values), rest))
}

/// Strip one pair of matching quotes. Empty values are rejected.
fn unquote(value: &str) -> Option<String> {
    let inner = ['\'', '"']
        .iter()
        .find_map(|q| {
            value
                .strip_prefix(*q)
                .and_then(|v| v.strip_suffix(*q))
        })
        .unwrap_or(value);
    (!inner.is_empty()).then(|| inner.to_string())
}
