//! Hand-rolled lexer for the filter expression grammar.

use crate::FilterError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Property(String),
    Argument(String),
    Tag(String),
    Word(String),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "`and`"),
            Token::Or => write!(f, "`or`"),
            Token::Not => write!(f, "`not`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Eq => write!(f, "`==`"),
            Token::Ne => write!(f, "`!=`"),
            Token::Lt => write!(f, "`<`"),
            Token::Le => write!(f, "`<=`"),
            Token::Gt => write!(f, "`>`"),
            Token::Ge => write!(f, "`>=`"),
            Token::Property(k) => write!(f, "&{k}"),
            Token::Argument(k) => write!(f, "@{k}"),
            Token::Tag(k) => write!(f, "#{k}"),
            Token::Word(w) => write!(f, "{w}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Num(n) => write!(f, "{n}"),
            Token::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/'
}

fn read_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if is_ident_char(c) {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

pub(crate) fn lex(source: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '&' => {
                chars.next();
                let ident = read_ident(&mut chars);
                tokens.push(Token::Property(ident));
            }
            '@' => {
                chars.next();
                let ident = read_ident(&mut chars);
                tokens.push(Token::Argument(ident));
            }
            '#' => {
                chars.next();
                let ident = read_ident(&mut chars);
                tokens.push(Token::Tag(ident));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == '"' {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(FilterError::UnexpectedChar('"'));
                }
                tokens.push(Token::Str(value));
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(FilterError::UnexpectedChar('='));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err(FilterError::UnexpectedChar('!'));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            c if c.is_ascii_digit() || (c == '-' && matches_number_lookahead(&chars)) => {
                let mut text = String::new();
                if c == '-' {
                    text.push('-');
                    chars.next();
                }
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num = text.parse::<f64>().map_err(|_| FilterError::UnexpectedChar(c))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident = read_ident(&mut chars);
                tokens.push(match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Word(ident),
                });
            }
            other => return Err(FilterError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

fn matches_number_lookahead(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut clone = chars.clone();
    clone.next();
    matches!(clone.peek(), Some(d) if d.is_ascii_digit())
}
