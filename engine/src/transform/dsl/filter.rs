//! Row filters
//!
//! Rules run against the raw row before any transform. They are OR'd: the
//! first matching rule skips the row.
//!
//! `not_in` matches (and therefore skips) every row whose value is *not*
//! listed. To drop `DEPOSIT` rows, write `in` over the drop-set or `not_in`
//! over the keep-set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mapping::{is_truthy, value_text, Row};
use crate::error::{ConfigError, ConfigResult};

/// Comparison applied by a filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    Contains,
}

/// A row-level skip rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Raw column tested
    pub field: String,
    pub operator: FilterOperator,
    /// Operand of `equals`, `not_equals` and `contains`
    #[serde(default)]
    pub value: Option<String>,
    /// Operand of `in` and `not_in`
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

impl FilterRule {
    pub fn new(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self { field: field.into(), operator, value: None, values: None }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Skip rows whose `field` is not one of `values`
    pub fn not_in<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(field, FilterOperator::NotIn).with_values(values)
    }

    /// Skip rows whose `field` is one of `values`
    pub fn one_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(field, FilterOperator::In).with_values(values)
    }

    /// Promote a single listed value to `value` for the operators that read
    /// `value`. Stores written from a comma-separated form field look like
    /// that.
    pub fn normalize(&mut self) {
        let reads_value = matches!(
            self.operator,
            FilterOperator::Equals | FilterOperator::NotEquals | FilterOperator::Contains
        );
        if reads_value && self.value.is_none() {
            if let Some([single]) = self.values.as_deref() {
                self.value = Some(single.clone());
            }
        }
    }

    /// Operand presence for the operator.
    pub fn validate(&self) -> ConfigResult<()> {
        let missing = match self.operator {
            FilterOperator::In | FilterOperator::NotIn if self.values.is_none() => Some("values"),
            FilterOperator::Contains if self.value.is_none() => Some("value"),
            _ => None,
        };
        match missing {
            Some(operand) => Err(ConfigError::InvalidFilter {
                field: self.field.clone(),
                message: format!("operator '{}' requires '{}'", self.operator.as_str(), operand),
            }),
            None => Ok(()),
        }
    }

    /// Whether this rule matches (i.e. skips) the row.
    pub fn matches(&self, row: &Row) -> bool {
        let raw = row.get(&self.field).unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::Equals => equals(raw, self.value.as_deref()),
            FilterOperator::NotEquals => !equals(raw, self.value.as_deref()),
            FilterOperator::In => self.listed(raw),
            FilterOperator::NotIn => !self.listed(raw),
            FilterOperator::IsEmpty => !is_truthy(raw),
            FilterOperator::IsNotEmpty => is_truthy(raw),
            FilterOperator::Contains => match self.value.as_deref() {
                Some(needle) if !needle.is_empty() => value_text(raw).contains(needle),
                _ => false,
            },
        }
    }

    /// An absent value is never listed.
    fn listed(&self, raw: &Value) -> bool {
        if raw.is_null() {
            return false;
        }
        let text = value_text(raw);
        self.values
            .as_ref()
            .is_some_and(|values| values.iter().any(|v| *v == text))
    }
}

/// Absent equals absent; otherwise compared as text.
fn equals(raw: &Value, expected: Option<&str>) -> bool {
    match (raw, expected) {
        (Value::Null, None) => true,
        (Value::Null, Some(_)) | (_, None) => false,
        (raw, Some(expected)) => value_text(raw) == expected,
    }
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::IsEmpty => "is_empty",
            FilterOperator::IsNotEmpty => "is_not_empty",
            FilterOperator::Contains => "contains",
        }
    }
}

/// First rule that skips `row`, if any
pub fn first_match<'a>(rules: &'a [FilterRule], row: &Row) -> Option<&'a FilterRule> {
    rules.iter().find(|rule| rule.matches(row))
}

pub fn should_skip(rules: &[FilterRule], row: &Row) -> bool {
    first_match(rules, row).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_not_in_skips_unlisted() {
        let rule = FilterRule::not_in("Type", ["DEPOSIT"]);
        assert!(!rule.matches(&row(json!({"Type": "DEPOSIT"}))));
        assert!(rule.matches(&row(json!({"Type": "BUY"}))));
        assert!(rule.matches(&row(json!({"Type": null}))));
    }

    #[test]
    fn test_in_skips_listed() {
        let rule = FilterRule::one_of("Type", ["DEPOSIT", "WITHDRAWAL"]);
        assert!(rule.matches(&row(json!({"Type": "WITHDRAWAL"}))));
        assert!(!rule.matches(&row(json!({"Type": "BUY"}))));
        assert!(!rule.matches(&Row::new()));
    }

    #[test]
    fn test_equals_and_not_equals() {
        let eq = FilterRule::new("Currency", FilterOperator::Equals).with_value("EUR");
        assert!(eq.matches(&row(json!({"Currency": "EUR"}))));
        assert!(!eq.matches(&row(json!({"Currency": "USD"}))));
        assert!(!eq.matches(&Row::new()));

        let absent = FilterRule::new("Currency", FilterOperator::Equals);
        assert!(absent.matches(&Row::new()));

        let ne = FilterRule::new("Currency", FilterOperator::NotEquals).with_value("EUR");
        assert!(ne.matches(&row(json!({"Currency": "USD"}))));
        assert!(!ne.matches(&row(json!({"Currency": "EUR"}))));
    }

    #[test]
    fn test_normalize_single_listed_value() {
        let mut rule: FilterRule = serde_json::from_value(json!({
            "field": "Description", "operator": "contains", "values": ["Dividend"], "value": null
        }))
        .unwrap();
        assert!(rule.validate().is_err());

        rule.normalize();
        assert_eq!(rule.value.as_deref(), Some("Dividend"));
        assert!(rule.validate().is_ok());
        assert!(rule.matches(&row(json!({"Description": "Dividend AAPL"}))));

        let mut listed = FilterRule::one_of("Type", ["BUY"]);
        listed.normalize();
        assert_eq!(listed.value, None);
    }

    #[test]
    fn test_emptiness() {
        let empty = FilterRule::new("Ticker", FilterOperator::IsEmpty);
        assert!(empty.matches(&row(json!({"Ticker": ""}))));
        assert!(empty.matches(&Row::new()));
        assert!(!empty.matches(&row(json!({"Ticker": "AAPL"}))));

        let not_empty = FilterRule::new("Ticker", FilterOperator::IsNotEmpty);
        assert!(not_empty.matches(&row(json!({"Ticker": "AAPL"}))));
    }

    #[test]
    fn test_contains() {
        let rule = FilterRule::new("Description", FilterOperator::Contains).with_value("fee");
        assert!(rule.matches(&row(json!({"Description": "custody fee"}))));
        assert!(!rule.matches(&row(json!({"Description": "buy"}))));
        assert!(!rule.matches(&Row::new()));
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            FilterRule::one_of("Type", ["DEPOSIT"]),
            FilterRule::new("Ticker", FilterOperator::IsEmpty),
        ];
        let r = row(json!({"Type": "DEPOSIT", "Ticker": ""}));
        assert_eq!(first_match(&rules, &r).unwrap().operator, FilterOperator::In);
        assert!(!should_skip(&rules, &row(json!({"Type": "BUY", "Ticker": "AAPL"}))));
    }

    #[test]
    fn test_validate_operands() {
        assert!(FilterRule::new("Type", FilterOperator::NotIn).validate().is_err());
        assert!(FilterRule::new("Type", FilterOperator::Contains).validate().is_err());
        assert!(FilterRule::new("Type", FilterOperator::IsEmpty).validate().is_ok());
        assert!(FilterRule::not_in("Type", ["BUY"]).validate().is_ok());
    }

    #[test]
    fn test_operator_wire_names() {
        let rule: FilterRule = serde_json::from_value(json!({
            "field": "Type", "operator": "is_not_empty"
        }))
        .unwrap();
        assert_eq!(rule.operator, FilterOperator::IsNotEmpty);
        assert_eq!(serde_json::to_value(FilterOperator::NotIn).unwrap(), json!("not_in"));
    }
}
