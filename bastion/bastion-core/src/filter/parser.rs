//! Recursive-descent-free parser for the simple grammar.
//!
//! The grammar has no nesting, so a single forward scan over the token list
//! is enough and arbitrarily long inputs cannot exhaust the stack.

use super::lexer::Token;
use super::{Condition, FilterOp, ParsedFilter};

pub(crate) fn parse_tokens(tokens: &[Token]) -> Option<ParsedFilter> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut pos = 0;

    loop {
        let (condition, next) = parse_condition(tokens, pos)?;
        current.push(condition);
        pos = next;

        match tokens.get(pos) {
            None => {
                groups.push(current);
                break;
            }
            Some(Token::And) => pos += 1,
            Some(Token::Or) => {
                groups.push(std::mem::take(&mut current));
                pos += 1;
            }
            Some(_) => return None,
        }
    }

    ParsedFilter::new(groups)
}

fn parse_condition(tokens: &[Token], pos: usize) -> Option<(Condition, usize)> {
    let key = match tokens.get(pos)? {
        Token::Word(word) => word.clone(),
        Token::Quoted(inner, quote) => format!("{quote}{inner}{quote}"),
        _ => return None,
    };

    match tokens.get(pos + 1)? {
        Token::Cmp(op) => {
            let value = literal(tokens.get(pos + 2)?)?;
            Some((Condition::new(key, *op, vec![value]), pos + 3))
        }
        Token::Word(word) if word.eq_ignore_ascii_case("in") => {
            let (values, next) = parse_list(tokens, pos + 2)?;
            Some((Condition::new(key, FilterOp::In, values), next))
        }
        _ => None,
    }
}

fn parse_list(tokens: &[Token], pos: usize) -> Option<(Vec<String>, usize)> {
    if tokens.get(pos)? != &Token::LBracket {
        return None;
    }

    let mut values = Vec::new();
    let mut pos = pos + 1;
    loop {
        values.push(literal(tokens.get(pos)?)?);
        pos += 1;
        match tokens.get(pos)? {
            Token::Comma => pos += 1,
            Token::RBracket => return Some((values, pos + 1)),
            _ => return None,
        }
    }
}

fn literal(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) => Some(word.clone()),
        Token::Quoted(inner, _) => Some(inner.clone()),
        _ => None,
    }
}
