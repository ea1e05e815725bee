//! Recursive-descent parser and evaluator for the filter grammar.
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" unary | primary
//! primary    := "(" expr ")" | claim (compare_op literal)?
//! compare_op := "==" | "!=" | "<" | "<=" | ">" | ">="
//! claim      := "&" ident | "@" ident | "#" ident | word
//! literal    := string | number | bool
//! ```

use crate::lexer::Token;
use crate::{Claims, FilterError};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Claim {
    Property(String),
    Argument(String),
    Tag(String),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Claim, CompareOp, Literal),
    Truthy(Claim),
}

fn claim_value(claim: &Claim, claims: &dyn Claims) -> Option<Value> {
    match claim {
        Claim::Property(key) => claims.property(key),
        Claim::Argument(name) => claims.argument(name),
        Claim::Tag(tag) => Some(Value::Bool(claims.has_tag(tag))),
        Claim::Word(word) => claims.attribute(word),
    }
}

fn literal_eq(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::String(s), Literal::Str(l)) => s == l,
        (Value::Bool(b), Literal::Bool(l)) => b == l,
        (Value::Number(n), Literal::Num(l)) => n.as_f64().is_some_and(|v| (v - l).abs() < f64::EPSILON),
        (Value::String(s), Literal::Num(l)) => s.parse::<f64>().is_ok_and(|v| (v - l).abs() < f64::EPSILON),
        _ => false,
    }
}

fn literal_cmp(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Number(n), Literal::Num(l)) => n.as_f64().and_then(|v| v.partial_cmp(l)),
        (Value::String(s), Literal::Str(l)) => Some(s.as_str().cmp(l.as_str())),
        (Value::String(s), Literal::Num(l)) => s.parse::<f64>().ok().and_then(|v| v.partial_cmp(l)),
        _ => None,
    }
}

impl Expr {
    pub(crate) fn eval(&self, claims: &dyn Claims) -> bool {
        match self {
            Expr::And(a, b) => a.eval(claims) && b.eval(claims),
            Expr::Or(a, b) => a.eval(claims) || b.eval(claims),
            Expr::Not(inner) => !inner.eval(claims),
            Expr::Truthy(claim) => match claim_value(claim, claims) {
                Some(Value::Bool(b)) => b,
                Some(_) => true,
                None => false,
            },
            Expr::Compare(claim, op, literal) => {
                let Some(value) = claim_value(claim, claims) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => literal_eq(&value, literal),
                    CompareOp::Ne => !literal_eq(&value, literal),
                    CompareOp::Lt => literal_cmp(&value, literal) == Some(Ordering::Less),
                    CompareOp::Le => matches!(
                        literal_cmp(&value, literal),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    CompareOp::Gt => literal_cmp(&value, literal) == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(
                        literal_cmp(&value, literal),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                }
            }
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

fn describe(token: Option<&Token>) -> String {
    token.map_or_else(|| "end of input".to_string(), ToString::to_string)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &'static str, matcher: impl Fn(&Token) -> bool) -> Result<&'a Token, FilterError> {
        match self.peek() {
            Some(tok) if matcher(tok) => {
                self.pos += 1;
                Ok(tok)
            }
            other => Err(FilterError::UnexpectedToken {
                found: describe(other),
                expected,
            }),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, FilterError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.parse_expr()?;
            self.expect(")", |t| matches!(t, Token::RParen))?;
            return Ok(inner);
        }

        let claim = self.parse_claim()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };

        let Some(op) = op else {
            return Ok(Expr::Truthy(claim));
        };
        self.advance();
        let literal = self.parse_literal()?;
        Ok(Expr::Compare(claim, op, literal))
    }

    fn parse_claim(&mut self) -> Result<Claim, FilterError> {
        match self.advance() {
            Some(Token::Property(key)) => Ok(Claim::Property(key.clone())),
            Some(Token::Argument(name)) => Ok(Claim::Argument(name.clone())),
            Some(Token::Tag(tag)) => Ok(Claim::Tag(tag.clone())),
            Some(Token::Word(word)) => Ok(Claim::Word(word.clone())),
            other => Err(FilterError::UnexpectedToken {
                found: describe(other),
                expected: "a claim (&key, @name, #tag, or a bare word)",
            }),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, FilterError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Literal::Str(s.clone())),
            Some(Token::Num(n)) => Ok(Literal::Num(*n)),
            Some(Token::Bool(b)) => Ok(Literal::Bool(*b)),
            Some(Token::Word(w)) => Ok(Literal::Str(w.clone())),
            other => Err(FilterError::UnexpectedToken {
                found: describe(other),
                expected: "a string, number, or boolean literal",
            }),
        }
    }
}

pub(crate) fn parse(tokens: &[Token]) -> Result<Expr, FilterError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != tokens.len() {
        return Err(FilterError::TrailingInput(describe(parser.peek())));
    }
    Ok(expr)
}
