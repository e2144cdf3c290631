//! Arithmetic formulas over row fields
//!
//! Grammar (no names other than row fields, no calls):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | primary
//! primary := number | field | '(' expr ')'
//! ```
//!
//! Field references are recognised against the row's own column names,
//! longest name first, and only on a token boundary. `price` therefore never
//! matches inside `price_total`, and names containing spaces such as
//! `Price per share` work unquoted. A word that is not a column is still a
//! field reference; it just has no value.
//!
//! Every field binds to its numeric value; empty, absent or non-numeric
//! values bind to `0`.

use serde_json::Value;

use super::condition::is_word_char;
use super::mapping::{value_text, Row};
use crate::error::{ExpressionError, ExpressionResult};

/// Arithmetic expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl Expr {
    /// Evaluate with field values taken from `row`.
    pub fn evaluate(&self, row: &Row) -> ExpressionResult<f64> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Field(name) => Ok(numeric_value(row.get(name))),
            Expr::Neg(inner) => Ok(-inner.evaluate(row)?),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(row)?;
                let r = rhs.evaluate(row)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div if r == 0.0 => Err(ExpressionError::DivisionByZero),
                    BinaryOp::Div => Ok(l / r),
                }
            }
        }
    }

    /// Field names referenced by the expression, in order of appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(name) => out.push(name),
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
        }
    }
}

/// Parse `expression`, recognising `known_fields` as field references.
pub fn parse(expression: &str, known_fields: &[&str]) -> ExpressionResult<Expr> {
    let tokens = tokenize(expression, known_fields)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = FormulaParser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken {
            found: token.kind.describe(),
            pos: token.pos,
        }),
    }
}

/// Parse `expression` against the columns of `row` and evaluate it.
pub fn evaluate(expression: &str, row: &Row) -> ExpressionResult<f64> {
    let names: Vec<&str> = row.keys().map(String::as_str).collect();
    let result = parse(expression, &names)?.evaluate(row)?;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(ExpressionError::NonFinite)
    }
}

fn numeric_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(v) => value_text(v).trim().parse().unwrap_or(0.0),
        None => 0.0,
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Field(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Field(name) => format!("field '{}'", name),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn tokenize(expression: &str, known_fields: &[&str]) -> ExpressionResult<Vec<Token>> {
    let mut names: Vec<&str> = known_fields.iter().copied().filter(|n| !n.is_empty()).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < expression.len() {
        let rest = &expression[pos..];
        let Some(ch) = rest.chars().next() else { break };

        if ch.is_whitespace() {
            pos += ch.len_utf8();
            continue;
        }

        if let Some(name) = names.iter().find(|name| matches_at_boundary(rest, name)) {
            tokens.push(Token { kind: TokenKind::Field(name.to_string()), pos });
            pos += name.len();
            continue;
        }

        let simple = match ch {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = simple {
            tokens.push(Token { kind, pos });
            pos += 1;
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let len = number_length(rest);
            let literal = &rest[..len];
            let n: f64 = literal
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))?;
            tokens.push(Token { kind: TokenKind::Number(n), pos });
            pos += len;
            continue;
        }

        if is_word_char(ch) {
            let len = rest
                .char_indices()
                .find(|(_, c)| !is_word_char(*c))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            tokens.push(Token { kind: TokenKind::Field(rest[..len].to_string()), pos });
            pos += len;
            continue;
        }

        return Err(ExpressionError::UnexpectedChar { ch, pos });
    }

    Ok(tokens)
}

fn matches_at_boundary(rest: &str, name: &str) -> bool {
    if !rest.starts_with(name) {
        return false;
    }
    let last = name.chars().next_back();
    let next = rest[name.len()..].chars().next();
    match (last, next) {
        (Some(l), Some(n)) => !(is_word_char(l) && is_word_char(n)),
        _ => true,
    }
}

/// Length of the numeric literal at the start of `s`: digits, optional
/// fraction, optional exponent.
fn number_length(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

// =============================================================================
// Parser
// =============================================================================

struct FormulaParser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> FormulaParser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expr(&mut self) -> ExpressionResult<Expr> {
        let mut lhs = self.parse_term()?;
        while let Some(op) = self.peek().and_then(|t| match t.kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            _ => None,
        }) {
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> ExpressionResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek().and_then(|t| match t.kind {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            _ => None,
        }) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ExpressionResult<Expr> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ExpressionResult<Expr> {
        let token = self.advance().ok_or(ExpressionError::UnexpectedEnd)?;
        match &token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(*n)),
            TokenKind::Field(name) => Ok(Expr::Field(name.clone())),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token { kind: TokenKind::RParen, .. }) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken {
                        found: other.kind.describe(),
                        pos: other.pos,
                    }),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.describe(),
                pos: token.pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_multiply_fields() {
        let r = row(json!({"quantity": "2", "price": "10.5"}));
        assert_eq!(evaluate("quantity * price", &r), Ok(21.0));
    }

    #[test]
    fn test_absent_field_is_zero() {
        let r = row(json!({"quantity": "2"}));
        assert_eq!(evaluate("quantity * price", &r), Ok(0.0));

        let r = row(json!({"quantity": "2", "price": ""}));
        assert_eq!(evaluate("quantity * price", &r), Ok(0.0));

        let r = row(json!({"quantity": "2", "price": null}));
        assert_eq!(evaluate("quantity * price", &r), Ok(0.0));
    }

    #[test]
    fn test_non_numeric_is_zero() {
        let r = row(json!({"quantity": "two", "fee": "1.5"}));
        assert_eq!(evaluate("quantity + fee", &r), Ok(1.5));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let r = row(json!({"a": "2", "b": "3", "c": "4"}));
        assert_eq!(evaluate("a + b * c", &r), Ok(14.0));
        assert_eq!(evaluate("(a + b) * c", &r), Ok(20.0));
        assert_eq!(evaluate("-a + -(b - c)", &r), Ok(-1.0));
        assert_eq!(evaluate("a / 4 + 1e1", &r), Ok(10.5));
    }

    #[test]
    fn test_prefix_field_names_do_not_collide() {
        let r = row(json!({"price": "2", "price_total": "100"}));
        assert_eq!(evaluate("price_total - price", &r), Ok(98.0));
        assert_eq!(evaluate("price * price_total", &r), Ok(200.0));
    }

    #[test]
    fn test_field_names_with_spaces() {
        let r = row(json!({"Quantity": "3", "Price per share": "12.5"}));
        assert_eq!(evaluate("Quantity * Price per share", &r), Ok(37.5));
    }

    #[test]
    fn test_division_by_zero() {
        let r = row(json!({"a": "1", "b": "0"}));
        assert_eq!(evaluate("a / b", &r), Err(ExpressionError::DivisionByZero));
    }

    #[test]
    fn test_rejects_non_arithmetic() {
        let r = row(json!({"a": "1"}));
        assert!(evaluate("a ** 2", &r).is_err());
        assert!(evaluate("__import__('os')", &r).is_err());
        assert!(evaluate("a; a", &r).is_err());
        assert!(evaluate("a 2", &r).is_err());
        assert!(evaluate("(a + 1", &r).is_err());
        assert_eq!(evaluate("", &r), Err(ExpressionError::Empty));
    }

    #[test]
    fn test_fields() {
        let expr = parse("Quantity * Price per share - fee", &["Quantity", "Price per share"]).unwrap();
        assert_eq!(expr.fields(), vec!["Quantity", "Price per share", "fee"]);
    }
}
