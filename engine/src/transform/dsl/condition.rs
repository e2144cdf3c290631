//! Condition mini-language
//!
//! Single-comparison predicates used by `suffix`/`prefix` guards and by
//! `conditional` branches:
//!
//! ```text
//! currency == 'EUR'
//! Type != "Transfer"
//! Type in ['BUY', 'SELL']
//! ```
//!
//! There are no boolean combinators and no numeric comparisons. Row values
//! are compared as strings; an absent value compares as the empty string.

use std::iter::Peekable;
use std::str::CharIndices;

use serde_json::Value;

use super::mapping::{value_text, Row};
use crate::error::{ExpressionError, ExpressionResult};

/// Parsed condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field == 'value'`
    Equals { field: String, value: String },
    /// `field != 'value'`
    NotEquals { field: String, value: String },
    /// `field in ['a', 'b']`
    In { field: String, values: Vec<String> },
}

impl Condition {
    /// Parse a condition string.
    pub fn parse(input: &str) -> ExpressionResult<Self> {
        ConditionParser::new(input).parse()
    }

    /// Field the condition reads.
    pub fn field(&self) -> &str {
        match self {
            Condition::Equals { field, .. }
            | Condition::NotEquals { field, .. }
            | Condition::In { field, .. } => field,
        }
    }

    /// Evaluate against a raw row.
    pub fn evaluate(&self, row: &Row) -> bool {
        let actual = row.get(self.field()).map(value_text).unwrap_or_default();
        match self {
            Condition::Equals { value, .. } => actual == value.as_str(),
            Condition::NotEquals { value, .. } => actual != value.as_str(),
            Condition::In { values, .. } => values.iter().any(|v| *v == actual),
        }
    }
}

/// A condition as written in the mapping, kept together with its parse.
///
/// Malformed conditions are not configuration errors: they evaluate to
/// `false` on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source: String,
    parsed: Result<Condition, ExpressionError>,
}

impl Predicate {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let parsed = Condition::parse(&source);
        Self { source, parsed }
    }

    /// Original text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.parsed.as_ref().ok()
    }

    pub fn parse_error(&self) -> Option<&ExpressionError> {
        self.parsed.as_ref().err()
    }

    pub fn evaluate(&self, row: &Row) -> bool {
        match &self.parsed {
            Ok(condition) => condition.evaluate(row),
            Err(_) => false,
        }
    }
}

impl From<&Predicate> for Value {
    fn from(predicate: &Predicate) -> Self {
        Value::String(predicate.source.clone())
    }
}

enum Operator {
    Eq,
    Ne,
    In,
}

struct ConditionParser<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> ConditionParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn parse(mut self) -> ExpressionResult<Condition> {
        self.skip_whitespace();
        if self.chars.peek().is_none() {
            return Err(ExpressionError::Empty);
        }

        let field = self.parse_identifier()?;
        self.skip_whitespace();
        let operator = self.parse_operator()?;
        self.skip_whitespace();

        let condition = match operator {
            Operator::Eq => Condition::Equals { field, value: self.parse_scalar()? },
            Operator::Ne => Condition::NotEquals { field, value: self.parse_scalar()? },
            Operator::In => Condition::In { field, values: self.parse_list()? },
        };

        self.skip_whitespace();
        match self.chars.next() {
            None => Ok(condition),
            Some((pos, ch)) => Err(ExpressionError::UnexpectedChar { ch, pos }),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn position(&mut self) -> usize {
        self.chars.peek().map(|(pos, _)| *pos).unwrap_or(self.input.len())
    }

    fn parse_identifier(&mut self) -> ExpressionResult<String> {
        let start = self.position();
        while self.chars.next_if(|(_, c)| is_word_char(*c)).is_some() {}
        let end = self.position();

        if start == end {
            return match self.chars.peek() {
                Some(&(pos, ch)) => Err(ExpressionError::UnexpectedChar { ch, pos }),
                None => Err(ExpressionError::UnexpectedEnd),
            };
        }
        Ok(self.input[start..end].to_string())
    }

    fn parse_operator(&mut self) -> ExpressionResult<Operator> {
        let pos = self.position();
        let rest = &self.input[pos..];

        let (operator, len) = if rest.starts_with("==") {
            (Operator::Eq, 2)
        } else if rest.starts_with("!=") {
            (Operator::Ne, 2)
        } else if rest.starts_with("in") && !rest[2..].starts_with(is_word_char) {
            (Operator::In, 2)
        } else if rest.is_empty() {
            return Err(ExpressionError::UnexpectedEnd);
        } else {
            let found: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
            return Err(ExpressionError::UnexpectedToken { found: format!("'{}'", found), pos });
        };

        for _ in 0..len {
            self.chars.next();
        }
        Ok(operator)
    }

    /// Quoted string, or a bare literal running to the end of the input.
    fn parse_scalar(&mut self) -> ExpressionResult<String> {
        match self.chars.peek() {
            Some(&(_, '\'')) | Some(&(_, '"')) => self.parse_quoted(),
            Some(_) => {
                let start = self.position();
                let literal = self.input[start..].trim_end();
                if let Some((offset, ch)) = literal
                    .char_indices()
                    .find(|(_, c)| matches!(c, '\'' | '"' | '=' | '!' | '[' | ']'))
                {
                    return Err(ExpressionError::UnexpectedChar { ch, pos: start + offset });
                }
                while self.chars.next().is_some() {}
                Ok(literal.to_string())
            }
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_quoted(&mut self) -> ExpressionResult<String> {
        let (start, quote) = self.chars.next().ok_or(ExpressionError::UnexpectedEnd)?;
        let mut literal = String::new();
        for (_, ch) in self.chars.by_ref() {
            if ch == quote {
                return Ok(literal);
            }
            literal.push(ch);
        }
        Err(ExpressionError::UnterminatedString(start))
    }

    fn parse_list(&mut self) -> ExpressionResult<Vec<String>> {
        self.expect('[')?;
        let mut values = Vec::new();

        self.skip_whitespace();
        if self.chars.next_if(|(_, c)| *c == ']').is_some() {
            return Ok(values);
        }

        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some(&(_, '\'')) | Some(&(_, '"')) => values.push(self.parse_quoted()?),
                Some(&(pos, ch)) => return Err(ExpressionError::UnexpectedChar { ch, pos }),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
            self.skip_whitespace();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ']')) => return Ok(values),
                Some((pos, ch)) => return Err(ExpressionError::UnexpectedChar { ch, pos }),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
    }

    fn expect(&mut self, expected: char) -> ExpressionResult<()> {
        match self.chars.next() {
            Some((_, ch)) if ch == expected => Ok(()),
            Some((pos, ch)) => Err(ExpressionError::UnexpectedChar { ch, pos }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// `\w` in the usual regex sense.
pub(crate) fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_equals() {
        let cond = Condition::parse("currency == 'EUR'").unwrap();
        assert_eq!(
            cond,
            Condition::Equals { field: "currency".into(), value: "EUR".into() }
        );
    }

    #[test]
    fn test_parse_not_equals_double_quotes() {
        let cond = Condition::parse("  Type!=\"Transfer\" ").unwrap();
        assert_eq!(
            cond,
            Condition::NotEquals { field: "Type".into(), value: "Transfer".into() }
        );
    }

    #[test]
    fn test_parse_bare_literal() {
        let cond = Condition::parse("currency == EUR").unwrap();
        assert_eq!(
            cond,
            Condition::Equals { field: "currency".into(), value: "EUR".into() }
        );
    }

    #[test]
    fn test_parse_in_list() {
        let cond = Condition::parse("Type in ['BUY', \"SELL\"]").unwrap();
        assert_eq!(
            cond,
            Condition::In { field: "Type".into(), values: vec!["BUY".into(), "SELL".into()] }
        );
        assert_eq!(
            Condition::parse("Type in []").unwrap(),
            Condition::In { field: "Type".into(), values: vec![] }
        );
    }

    #[test]
    fn test_malformed_conditions() {
        assert_eq!(Condition::parse(""), Err(ExpressionError::Empty));
        assert!(Condition::parse("currency").is_err());
        assert!(Condition::parse("currency > '5'").is_err());
        assert!(Condition::parse("currency == 'EUR").is_err());
        assert!(Condition::parse("Type in 'BUY'").is_err());
        assert!(Condition::parse("Type in ['BUY' 'SELL']").is_err());
        assert!(Condition::parse("== 'x'").is_err());
        assert!(Condition::parse("a == 'x' extra").is_err());
    }

    #[test]
    fn test_evaluate() {
        let r = row(json!({"currency": "EUR", "Type": "BUY"}));
        assert!(Condition::parse("currency == 'EUR'").unwrap().evaluate(&r));
        assert!(!Condition::parse("currency != 'EUR'").unwrap().evaluate(&r));
        assert!(Condition::parse("Type in ['BUY', 'SELL']").unwrap().evaluate(&r));
        assert!(!Condition::parse("Type in ['DIVIDEND']").unwrap().evaluate(&r));
    }

    #[test]
    fn test_absent_value_compares_as_empty() {
        let r = row(json!({"currency": null}));
        assert!(Condition::parse("currency == ''").unwrap().evaluate(&r));
        assert!(Condition::parse("missing != 'EUR'").unwrap().evaluate(&r));
    }

    #[test]
    fn test_malformed_predicate_is_false() {
        let r = row(json!({"currency": "EUR"}));
        let predicate = Predicate::new("currency === 'EUR'");
        assert!(predicate.parse_error().is_some());
        assert!(!predicate.evaluate(&r));
        assert_eq!(predicate.source(), "currency === 'EUR'");
    }
}
