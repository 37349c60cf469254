//! Parser for the local-part set expression language:
//!
//!   expr  := atom (OP atom)*      -- a single OP repeated; mixing OPs at
//!                                    the same brace depth is an error
//!   atom  := identifier | "{" expr "}"
//!   OP    := "_|_" | "_&_" | "_-_"
//!
//! The operator spellings overlap with the identifier character class
//! (`[A-Za-z0-9._-]`), so this is hand-lexed rather than built on a PEG
//! grammar: at every position we check for a 3-byte operator match before
//! letting an identifier run continue, the same way header parsing in
//! mailparsing walks a message byte by byte instead of reaching for a
//! combinator library.

use crate::error::{ParseError, ParseErrorReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Ref(String),
    Union(Vec<Expr>),
    Inter(Vec<Expr>),
    Diff(Vec<Expr>),
    Group(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Op(char),
    LBrace,
    RBrace,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

fn lex(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let n = chars.len();
    let mut tokens = Vec::new();
    let mut ident_start: Option<usize> = None;
    let mut ident_buf = String::new();
    let mut i = 0usize;

    macro_rules! flush_ident {
        () => {
            if let Some(start) = ident_start.take() {
                tokens.push((Token::Ident(std::mem::take(&mut ident_buf)), start));
            }
        };
    }

    while i < n {
        let c = chars[i];

        if c == '{' {
            flush_ident!();
            tokens.push((Token::LBrace, i));
            i += 1;
            continue;
        }
        if c == '}' {
            flush_ident!();
            tokens.push((Token::RBrace, i));
            i += 1;
            continue;
        }
        if i + 3 <= n {
            let three: String = chars[i..i + 3].iter().collect();
            let op = match three.as_str() {
                "_|_" => Some('|'),
                "_&_" => Some('&'),
                "_-_" => Some('-'),
                _ => None,
            };
            if let Some(op) = op {
                flush_ident!();
                tokens.push((Token::Op(op), i));
                i += 3;
                continue;
            }
        }
        if is_ident_char(c) {
            if ident_start.is_none() {
                ident_start = Some(i);
            }
            ident_buf.push(c);
            i += 1;
            continue;
        }

        return Err(ParseError {
            reason: ParseErrorReason::BadIdentifier,
            position: i,
        });
    }
    flush_ident!();
    Ok(tokens)
}

/// Parses a single atom: an identifier or a braced sub-expression.
fn parse_atom(
    tokens: &[(Token, usize)],
    pos: usize,
    end_pos: usize,
) -> Result<(Expr, usize), ParseError> {
    match tokens.get(pos) {
        Some((Token::Ident(name), _)) => Ok((Expr::Ref(name.clone()), pos + 1)),
        Some((Token::LBrace, brace_pos)) => {
            let brace_pos = *brace_pos;
            if matches!(tokens.get(pos + 1), Some((Token::RBrace, _))) {
                return Err(ParseError {
                    reason: ParseErrorReason::EmptyGroup,
                    position: brace_pos,
                });
            }
            let (inner, after) = parse_chain(tokens, pos + 1, end_pos)?;
            match tokens.get(after) {
                Some((Token::RBrace, _)) => Ok((Expr::Group(Box::new(inner)), after + 1)),
                _ => Err(ParseError {
                    reason: ParseErrorReason::MismatchedBrace,
                    position: brace_pos,
                }),
            }
        }
        Some((Token::RBrace, p)) => Err(ParseError {
            reason: ParseErrorReason::MismatchedBrace,
            position: *p,
        }),
        Some((Token::Op(_), p)) => Err(ParseError {
            reason: ParseErrorReason::EmptyOperand,
            position: *p,
        }),
        None => Err(ParseError {
            reason: ParseErrorReason::EmptyOperand,
            position: end_pos,
        }),
    }
}

/// Parses a chain of atoms joined by a single, consistent operator.
fn parse_chain(
    tokens: &[(Token, usize)],
    pos: usize,
    end_pos: usize,
) -> Result<(Expr, usize), ParseError> {
    let (first, mut pos) = parse_atom(tokens, pos, end_pos)?;

    let op = match tokens.get(pos) {
        Some((Token::Op(op), _)) => *op,
        _ => return Ok((first, pos)),
    };

    let mut operands = vec![first];
    loop {
        // consume the operator we just peeked at
        pos += 1;
        let (atom, next_pos) = parse_atom(tokens, pos, end_pos)?;
        operands.push(atom);
        pos = next_pos;

        match tokens.get(pos) {
            Some((Token::Op(next_op), p)) => {
                if *next_op != op {
                    return Err(ParseError {
                        reason: ParseErrorReason::MixedOperators,
                        position: *p,
                    });
                }
            }
            _ => break,
        }
    }

    let expr = match op {
        '|' => Expr::Union(operands),
        '&' => Expr::Inter(operands),
        '-' => Expr::Diff(operands),
        _ => unreachable!("lexer only ever produces '|', '&', '-'"),
    };
    Ok((expr, pos))
}

/// Parses a full local-part expression, requiring every token to be consumed.
pub fn parse(local_part: &str) -> Result<Expr, ParseError> {
    let end_pos = local_part.chars().count();
    let tokens = lex(local_part)?;
    let (expr, pos) = parse_chain(&tokens, 0, end_pos)?;

    if pos == tokens.len() {
        return Ok(expr);
    }

    match tokens.get(pos) {
        Some((Token::RBrace, p)) => Err(ParseError {
            reason: ParseErrorReason::MismatchedBrace,
            position: *p,
        }),
        Some((Token::LBrace, p)) | Some((Token::Ident(_), p)) => Err(ParseError {
            reason: ParseErrorReason::MisplacedBrace,
            position: *p,
        }),
        Some((Token::Op(_), p)) => Err(ParseError {
            reason: ParseErrorReason::MixedOperators,
            position: *p,
        }),
        None => Err(ParseError {
            reason: ParseErrorReason::EmptyOperand,
            position: end_pos,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_identifier() {
        let expr = parse("sales").unwrap();
        k9::assert_equal!(expr, Expr::Ref("sales".to_string()));
    }

    #[test]
    fn union_chain() {
        let expr = parse("sf_|_dog_|_cat").unwrap();
        k9::assert_equal!(
            expr,
            Expr::Union(vec![
                Expr::Ref("sf".to_string()),
                Expr::Ref("dog".to_string()),
                Expr::Ref("cat".to_string()),
            ])
        );
    }

    #[test]
    fn diff_chain_is_left_to_right() {
        let expr = parse("dog_-_bob.q.brown").unwrap();
        k9::assert_equal!(
            expr,
            Expr::Diff(vec![
                Expr::Ref("dog".to_string()),
                Expr::Ref("bob.q.brown".to_string()),
            ])
        );
    }

    #[test]
    fn braced_subexpression_with_different_inner_operator() {
        let expr = parse("sf_&_{dog_|_cat}").unwrap();
        k9::assert_equal!(
            expr,
            Expr::Inter(vec![
                Expr::Ref("sf".to_string()),
                Expr::Group(Box::new(Expr::Union(vec![
                    Expr::Ref("dog".to_string()),
                    Expr::Ref("cat".to_string()),
                ]))),
            ])
        );
    }

    #[test]
    fn mixed_operators_without_braces_is_an_error() {
        let err = parse("sf_&_dog_|_cat").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::MixedOperators);
    }

    #[test]
    fn stray_closing_brace_is_mismatched() {
        let err = parse("a_&_b}_-_c").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::MismatchedBrace);
    }

    #[test]
    fn unclosed_group_is_mismatched() {
        let err = parse("{a_&_b").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::MismatchedBrace);
    }

    #[test]
    fn adjacent_group_with_no_operator_is_misplaced() {
        let err = parse("{a}{b}").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::MisplacedBrace);
    }

    #[test]
    fn empty_group_is_rejected() {
        let err = parse("sf_&_{}").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::EmptyGroup);
    }

    #[test]
    fn trailing_operator_is_an_empty_operand() {
        let err = parse("sf_&_").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::EmptyOperand);
    }

    #[test]
    fn leading_operator_is_an_empty_operand() {
        let err = parse("_&_sf").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::EmptyOperand);
    }

    #[test]
    fn disallowed_character_is_a_bad_identifier() {
        let err = parse("sales team").unwrap_err();
        k9::assert_equal!(err.reason, ParseErrorReason::BadIdentifier);
    }
}
