//! Tokenizer for the simple boolean filter grammar.
//!
//! Only the exact operator tokens below change parser state. Everything else,
//! including quotes inside quoted strings, semicolons, SQL keywords, comment
//! markers, NUL bytes and invisible Unicode, ends up inside a literal token.

use super::FilterOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Unquoted literal run.
    Word(String),
    /// Quoted literal; holds the inner text and the quote character.
    Quoted(String, char),
    /// Comparison operator (`==`, `!=`, `>=`, `<=`, `>`, `<`).
    Cmp(FilterOp),
    And,
    Or,
    LBracket,
    RBracket,
    Comma,
}

fn is_special(c: char) -> bool {
    matches!(c, '\'' | '"' | '=' | '!' | '<' | '>' | '&' | '|' | '[' | ']' | ',')
}

/// Split `input` into tokens. Returns `None` when some character sequence
/// cannot be reduced to a recognized token (lone `=`, `&`, `|`, `!`, or an
/// unterminated quote).
pub(crate) fn tokenize(input: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '\'' | '"' => {
                let mut inner = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    inner.push(next);
                }
                if !closed {
                    return None;
                }
                tokens.push(Token::Quoted(inner, c));
            }
            '=' => {
                if chars.next_if_eq(&'=').is_none() {
                    return None;
                }
                tokens.push(Token::Cmp(FilterOp::Eq));
            }
            '!' => {
                if chars.next_if_eq(&'=').is_none() {
                    return None;
                }
                tokens.push(Token::Cmp(FilterOp::Ne));
            }
            '>' => {
                let op = if chars.next_if_eq(&'=').is_some() {
                    FilterOp::Gte
                } else {
                    FilterOp::Gt
                };
                tokens.push(Token::Cmp(op));
            }
            '<' => {
                let op = if chars.next_if_eq(&'=').is_some() {
                    FilterOp::Lte
                } else {
                    FilterOp::Lt
                };
                tokens.push(Token::Cmp(op));
            }
            '&' => {
                if chars.next_if_eq(&'&').is_none() {
                    return None;
                }
                tokens.push(Token::And);
            }
            '|' => {
                if chars.next_if_eq(&'|').is_none() {
                    return None;
                }
                tokens.push(Token::Or);
            }
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || is_special(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_condition() {
        let tokens = tokenize("department == 'FINANCE'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("department".into()),
                Token::Cmp(FilterOp::Eq),
                Token::Quoted("FINANCE".into(), '\''),
            ]
        );
    }

    #[test]
    fn test_operators_inside_quotes_are_literal() {
        let tokens = tokenize("k == \"a || b && c == 'd'\"").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2], Token::Quoted("a || b && c == 'd'".into(), '"'));
    }

    #[test]
    fn test_range_and_list_tokens() {
        let tokens = tokenize("page>=3&&x in [a,b]").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("page".into()),
                Token::Cmp(FilterOp::Gte),
                Token::Word("3".into()),
                Token::And,
                Token::Word("x".into()),
                Token::Word("in".into()),
                Token::LBracket,
                Token::Word("a".into()),
                Token::Comma,
                Token::Word("b".into()),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_unrecognized_sequences() {
        assert!(tokenize("a = 'b'").is_none());
        assert!(tokenize("a == 'b' & c == 'd'").is_none());
        assert!(tokenize("a == 'b' | c == 'd'").is_none());
        assert!(tokenize("!a").is_none());
        assert!(tokenize("a == 'unterminated").is_none());
    }

    #[test]
    fn test_invisible_characters_stay_in_words() {
        let tokens = tokenize("dep\u{200B}t == x\u{0}y").unwrap();
        assert_eq!(tokens[0], Token::Word("dep\u{200B}t".into()));
        assert_eq!(tokens[2], Token::Word("x\u{0}y".into()));
    }
}
