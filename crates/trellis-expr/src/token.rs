use crate::error::{ExprError, Result};

/// A single lexical token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,

    OrOr,
    AndAnd,
    EqEq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,

    Question,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

/// Tokenize an expression body into `(offset, token)` pairs.
pub fn tokenize(src: &str) -> Result<Vec<(usize, Token)>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((i, Token::OrOr));
                    i += 2;
                } else {
                    return Err(ExprError::parse(i, "expected '||'"));
                }
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((i, Token::AndAnd));
                    i += 2;
                } else {
                    return Err(ExprError::parse(i, "expected '&&'"));
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::EqEq));
                    i += 2;
                } else {
                    return Err(ExprError::parse(i, "expected '=='"));
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::NotEq));
                    i += 2;
                } else {
                    return Err(ExprError::parse(i, "expected '!='"));
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::Ge));
                    i += 2;
                } else {
                    tokens.push((i, Token::Gt));
                    i += 1;
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::Le));
                    i += 2;
                } else {
                    tokens.push((i, Token::Lt));
                    i += 1;
                }
            }
            b'?' => {
                tokens.push((i, Token::Question));
                i += 1;
            }
            b':' => {
                tokens.push((i, Token::Colon));
                i += 1;
            }
            b'.' => {
                tokens.push((i, Token::Dot));
                i += 1;
            }
            b',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            b'(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            b'[' => {
                tokens.push((i, Token::LBracket));
                i += 1;
            }
            b']' => {
                tokens.push((i, Token::RBracket));
                i += 1;
            }
            b'+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            b'-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            b'*' => {
                tokens.push((i, Token::Star));
                i += 1;
            }
            b'/' => {
                tokens.push((i, Token::Slash));
                i += 1;
            }
            b'%' => {
                tokens.push((i, Token::Percent));
                i += 1;
            }
            b'\'' | b'"' => {
                let (s, next) = lex_string(src, i)?;
                tokens.push((i, Token::Str(s)));
                i = next;
            }
            b'0'..=b'9' => {
                let (tok, next) = lex_number(src, i)?;
                tokens.push((i, tok));
                i = next;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &src[start..i];
                let tok = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((start, tok));
            }
            _ => {
                return Err(ExprError::parse(
                    i,
                    format!("unexpected character '{}'", &src[i..].chars().next().unwrap_or('?')),
                ));
            }
        }
    }

    Ok(tokens)
}

fn lex_string(src: &str, start: usize) -> Result<(String, usize)> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let esc = bytes
                    .get(i + 1)
                    .ok_or_else(|| ExprError::parse(i, "unterminated escape"))?;
                out.push(match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'\\' => '\\',
                    b'\'' => '\'',
                    b'"' => '"',
                    other => {
                        return Err(ExprError::parse(
                            i,
                            format!("unknown escape '\\{}'", *other as char),
                        ))
                    }
                });
                i += 2;
            }
            b if b == quote => return Ok((out, i + 1)),
            _ => {
                let ch = src[i..].chars().next().unwrap();
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    Err(ExprError::parse(start, "unterminated string literal"))
}

fn lex_number(src: &str, start: usize) -> Result<(Token, usize)> {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut is_float = false;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len()
        && bytes[i] == b'.'
        && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())
    {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    let text = &src[start..i];
    let tok = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| ExprError::parse(start, "invalid float literal"))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| ExprError::parse(start, "invalid integer literal"))?,
        )
    };
    Ok((tok, i))
}
