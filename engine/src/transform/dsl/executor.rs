//! Row processor
//!
//! Runs the filter rules, then every field mapping in declaration order.
//! Field errors annotate the row; they never stop it from being assembled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::filter::should_skip;
use super::mapping::{value_text, MappingConfig, Row};

/// `field` of errors that concern the whole row
pub const WHOLE_ROW: &str = "*";

/// A problem tied to one input line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based physical line; the header is line 1
    pub line_number: usize,
    /// Destination field, or [`WHOLE_ROW`]
    pub field: String,
    pub message: String,
    /// Offending raw value
    pub source_value: Option<String>,
    /// Raw row snapshot
    pub row_data: Row,
}

impl RowError {
    pub fn new(line_number: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line_number,
            field: field.into(),
            message: message.into(),
            source_value: None,
            row_data: Row::new(),
        }
    }

    /// Error affecting the row as a whole
    pub fn whole_row(line_number: usize, message: impl Into<String>) -> Self {
        Self::new(line_number, WHOLE_ROW, message)
    }

    /// Attach the raw source value. `Null` means absent.
    pub fn with_source(mut self, value: &Value) -> Self {
        self.source_value = match value {
            Value::Null => None,
            other => Some(value_text(other).into_owned()),
        };
        self
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.row_data = row;
        self
    }

    pub fn is_whole_row(&self) -> bool {
        self.field == WHOLE_ROW
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}, field '{}'", self.line_number, self.field)?;
        if let Some(ref value) = self.source_value {
            write!(f, " (value '{}')", value)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// What happened to one input row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// A filter rule matched
    Skipped,
    /// Every declared destination field is present, errors or not
    Transformed { row: Row, errors: Vec<RowError> },
}

/// Apply `mapping` to one raw row read at `line_number`.
pub fn transform_row(row: &Row, mapping: &MappingConfig, line_number: usize) -> RowOutcome {
    if should_skip(&mapping.filter_rules, row) {
        return RowOutcome::Skipped;
    }

    let mut output = Row::new();
    let mut errors = Vec::new();

    for field_mapping in &mapping.field_mappings {
        let source = field_mapping
            .source_field
            .as_ref()
            .and_then(|name| row.get(name))
            .unwrap_or(&Value::Null);

        let applied = field_mapping.transform.apply(source, row);
        if let Some(message) = applied.error {
            errors.push(
                RowError::new(line_number, &field_mapping.destination_field, message)
                    .with_source(source)
                    .with_row(row.clone()),
            );
        }
        // Duplicate destinations: later value wins, first position kept.
        output.insert(field_mapping.destination_field.clone(), applied.value);
    }

    RowOutcome::Transformed { row: output, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::dsl::mapping::{example_mapping, FieldMapping};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn revolut_row(date: &str, kind: &str) -> Row {
        row(json!({
            "Date": date,
            "Ticker": "AAPL",
            "Type": kind,
            "Quantity": "3",
            "Price per share": "150.25",
            "Total Amount": "450.75",
            "Currency": "USD",
            "FX Rate": "1.0"
        }))
    }

    #[test]
    fn test_transform_clean_row() {
        let mapping = example_mapping();
        let outcome = transform_row(&revolut_row("2020-02-03T09:18:39.254Z", "BUY"), &mapping, 2);

        let RowOutcome::Transformed { row, errors } = outcome else {
            panic!("row should not be skipped");
        };
        assert!(errors.is_empty());
        assert_eq!(row["date"], "2020-02-03");
        assert_eq!(row["symbol"], "AAPL");
        assert_eq!(row["type"], "BUY");
        assert_eq!(row["unitPrice"], "150.25");
        assert_eq!(row["fee"], 0);
        assert_eq!(row["account"], "Revolut");
        assert_eq!(row["dataSource"], "YAHOO");

        let columns: Vec<&String> = row.keys().collect();
        assert_eq!(
            columns,
            vec!["date", "symbol", "type", "quantity", "unitPrice", "fee", "currency", "account", "dataSource"]
        );
    }

    #[test]
    fn test_filtered_row_is_skipped() {
        let mapping = example_mapping();
        let outcome = transform_row(&revolut_row("2020-02-03T09:18:39", "DEPOSIT"), &mapping, 4);
        assert_eq!(outcome, RowOutcome::Skipped);
    }

    #[test]
    fn test_field_error_keeps_row() {
        let mapping = example_mapping();
        let outcome = transform_row(&revolut_row("03/02/2020", "TRANSFER"), &mapping, 3);

        let RowOutcome::Transformed { row, errors } = outcome else {
            panic!("row should not be skipped");
        };
        // Date and type both fail: TRANSFER is not in the lookup table
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "date");
        assert_eq!(errors[0].line_number, 3);
        assert_eq!(errors[0].source_value.as_deref(), Some("03/02/2020"));
        assert_eq!(errors[0].row_data["Ticker"], "AAPL");
        assert_eq!(errors[1].field, "type");
        assert_eq!(row["date"], "03/02/2020");
        assert_eq!(row["type"], Value::Null);
        assert_eq!(row.len(), 9);
    }

    #[test]
    fn test_duplicate_destination_last_wins() {
        let mapping = MappingConfig::new("dups")
            .with_field(FieldMapping::direct("symbol", "Ticker"))
            .with_field(FieldMapping::direct("currency", "Currency"))
            .with_field(FieldMapping::constant("symbol", json!("OVERRIDE")));

        let outcome = transform_row(&row(json!({"Ticker": "AAPL", "Currency": "USD"})), &mapping, 2);
        let RowOutcome::Transformed { row, .. } = outcome else {
            panic!("row should not be skipped");
        };
        let columns: Vec<&String> = row.keys().collect();
        assert_eq!(columns, vec!["symbol", "currency"]);
        assert_eq!(row["symbol"], "OVERRIDE");
    }

    #[test]
    fn test_missing_source_column_is_null() {
        let mapping = MappingConfig::new("m").with_field(FieldMapping::direct("symbol", "Ticker"));
        let outcome = transform_row(&Row::new(), &mapping, 2);
        let RowOutcome::Transformed { row, errors } = outcome else {
            panic!("row should not be skipped");
        };
        assert!(errors.is_empty());
        assert_eq!(row["symbol"], Value::Null);
    }

    #[test]
    fn test_row_error_display() {
        let err = RowError::new(5, "type", "Lookup value not found in mapping table").with_source(&json!("SELL"));
        assert_eq!(
            err.to_string(),
            "Line 5, field 'type' (value 'SELL'): Lookup value not found in mapping table"
        );
        let whole = RowError::whole_row(7, "Row processing failed");
        assert!(whole.is_whole_row());
        assert_eq!(whole.to_string(), "Line 7, field '*': Row processing failed");
    }
}
