//! Mapping configuration
//!
//! A mapping describes how one source row type (e.g. a Revolut stocks
//! export) becomes one destination row type (e.g. a Ghostfolio activity).
//! The wire format is the JSON written by the dashboard; every transform kind
//! is checked and turned into a typed [`Transform`] when the mapping is
//! loaded, so a broken configuration fails once instead of on every row.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::condition::Predicate;
use super::filter::FilterRule;
use super::formula;
use crate::error::{ConfigError, ConfigResult};

/// A raw input row: column name to cell text, `Null` for absent cells.
pub type Row = Map<String, Value>;

pub const DEFAULT_INPUT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DEFAULT_OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Key of the fallback entry in a lookup table.
pub const LOOKUP_DEFAULT_KEY: &str = "_default";

/// A complete source → destination mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Store identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable name
    #[serde(default = "default_name")]
    pub name: String,

    /// Source spec this mapping reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    /// Destination spec this mapping produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Ordered field rules; order is the output column order
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    /// Row skip rules, OR'd
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
}

fn default_name() -> String {
    "Unknown".to_string()
}

/// Rule for a single destination field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFieldMapping", into = "RawFieldMapping")]
pub struct FieldMapping {
    pub destination_field: String,
    pub source_field: Option<String>,
    pub transform: Transform,
}

/// How a destination value is derived
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Source value, unchanged
    Direct,
    /// Literal value, row ignored
    Constant { value: Value },
    /// Reformat a date/time string
    DateFormat {
        input_format: String,
        output_format: String,
    },
    /// Table lookup; the table may carry a `_default` entry
    Lookup { table: Map<String, Value> },
    /// Append `value`, optionally only when `condition` holds
    Suffix {
        value: String,
        condition: Option<Predicate>,
    },
    /// Prepend `value`, optionally only when `condition` holds
    Prefix {
        value: String,
        condition: Option<Predicate>,
    },
    /// Arithmetic over row fields
    Formula { expression: String },
    /// First matching branch wins
    Conditional { branches: Vec<Branch> },
    /// Kind this engine does not know; behaves like `Direct`
    Unrecognized { kind: String, config: Value },
}

/// One entry of a `conditional` transform
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    When { condition: Predicate, then: Value },
    Otherwise(Value),
}

impl Transform {
    /// Wire name (`transform_type`)
    pub fn kind(&self) -> &str {
        match self {
            Transform::Direct => "direct",
            Transform::Constant { .. } => "constant",
            Transform::DateFormat { .. } => "date_format",
            Transform::Lookup { .. } => "lookup",
            Transform::Suffix { .. } => "suffix",
            Transform::Prefix { .. } => "prefix",
            Transform::Formula { .. } => "formula",
            Transform::Conditional { .. } => "conditional",
            Transform::Unrecognized { kind, .. } => kind,
        }
    }

    /// Conditions used by this transform.
    pub fn predicates(&self) -> Vec<&Predicate> {
        match self {
            Transform::Suffix { condition, .. } | Transform::Prefix { condition, .. } => {
                condition.iter().collect()
            }
            Transform::Conditional { branches } => branches
                .iter()
                .filter_map(|b| match b {
                    Branch::When { condition, .. } => Some(condition),
                    Branch::Otherwise(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl MappingConfig {
    /// Create an empty mapping
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            source_id: None,
            destination_id: None,
            description: String::new(),
            field_mappings: Vec::new(),
            filter_rules: Vec::new(),
        }
    }

    /// Parse and validate a mapping from a JSON string
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let mut mapping: Self = serde_json::from_str(json)?;
        mapping.normalize();
        mapping.validate()?;
        Ok(mapping)
    }

    /// Parse and validate a mapping from a JSON value
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let mut mapping: Self = serde_json::from_value(value)?;
        mapping.normalize();
        mapping.validate()?;
        Ok(mapping)
    }

    /// Read, parse and validate a mapping file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn normalize(&mut self) {
        for rule in &mut self.filter_rules {
            rule.normalize();
        }
    }

    /// Checks that span several entries. Per-field checks already ran
    /// during deserialization.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.field_mappings.is_empty() {
            return Err(ConfigError::NoFieldMappings(self.name.clone()));
        }
        for rule in &self.filter_rules {
            rule.validate()?;
        }
        Ok(())
    }

    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.field_mappings.push(mapping);
        self
    }

    pub fn with_filter(mut self, rule: FilterRule) -> Self {
        self.filter_rules.push(rule);
        self
    }

    /// Destination fields in output order, duplicates collapsed.
    pub fn destination_fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.field_mappings
            .iter()
            .map(|m| m.destination_field.as_str())
            .filter(|f| seen.insert(*f))
            .collect()
    }

    /// Destination fields declared more than once. The later mapping wins.
    pub fn duplicate_destinations(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for mapping in &self.field_mappings {
            let field = mapping.destination_field.as_str();
            if !seen.insert(field) && !duplicates.contains(&field) {
                duplicates.push(field);
            }
        }
        duplicates
    }

    /// Source columns referenced by field sources, filters and conditions.
    /// Formula operands are not included: they are only known per row.
    pub fn source_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for mapping in &self.field_mappings {
            if let Some(ref source) = mapping.source_field {
                columns.push(source.clone());
            }
            for predicate in mapping.transform.predicates() {
                if let Some(condition) = predicate.condition() {
                    columns.push(condition.field().to_string());
                }
            }
        }
        columns.extend(self.filter_rules.iter().map(|r| r.field.clone()));

        columns.sort();
        columns.dedup();
        columns
    }

    /// Referenced columns missing from `headers`. Formula operands count:
    /// a name that is not a column of the file would silently bind to 0.
    pub fn missing_columns(&self, headers: &[String]) -> Vec<String> {
        let known: Vec<&str> = headers.iter().map(String::as_str).collect();
        let mut missing: Vec<String> = self
            .source_columns()
            .into_iter()
            .filter(|col| !known.contains(&col.as_str()))
            .collect();

        for mapping in &self.field_mappings {
            if let Transform::Formula { expression } = &mapping.transform {
                if let Ok(expr) = formula::parse(expression, &known) {
                    missing.extend(
                        expr.fields()
                            .into_iter()
                            .filter(|field| !known.contains(field))
                            .map(str::to_string),
                    );
                }
            }
        }

        missing.sort();
        missing.dedup();
        missing
    }

    /// Human-readable notes about configuration quirks that do not stop a run.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .duplicate_destinations()
            .into_iter()
            .map(|f| format!("Duplicate destination field '{}': the last mapping wins", f))
            .collect();

        for mapping in &self.field_mappings {
            for predicate in mapping.transform.predicates() {
                if let Some(err) = predicate.parse_error() {
                    warnings.push(format!(
                        "Malformed condition for '{}': \"{}\" ({}), treated as false",
                        mapping.destination_field,
                        predicate.source(),
                        err
                    ));
                }
            }
        }
        warnings
    }
}

impl FieldMapping {
    pub fn new(destination: impl Into<String>, source: Option<&str>, transform: Transform) -> Self {
        Self {
            destination_field: destination.into(),
            source_field: source.map(str::to_string),
            transform,
        }
    }

    /// Copy a source column unchanged
    pub fn direct(destination: impl Into<String>, source: &str) -> Self {
        Self::new(destination, Some(source), Transform::Direct)
    }

    /// Fill with a literal
    pub fn constant(destination: impl Into<String>, value: Value) -> Self {
        Self::new(destination, None, Transform::Constant { value })
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFieldMapping {
    destination_field: String,
    #[serde(default)]
    source_field: Option<String>,
    #[serde(default = "default_transform_type")]
    transform_type: String,
    #[serde(default)]
    transform_config: Value,
}

fn default_transform_type() -> String {
    "direct".to_string()
}

impl TryFrom<RawFieldMapping> for FieldMapping {
    type Error = ConfigError;

    fn try_from(raw: RawFieldMapping) -> Result<Self, Self::Error> {
        let field = raw.destination_field.as_str();
        let transform = match raw.transform_type.as_str() {
            "direct" => Transform::Direct,
            "constant" => {
                let config = config_object(field, "constant", raw.transform_config)?;
                Transform::Constant {
                    value: config.get("value").cloned().unwrap_or(Value::Null),
                }
            }
            "date_format" => {
                let config = config_object(field, "date_format", raw.transform_config)?;
                let input_format = optional_string(field, &config, "input_format")?
                    .unwrap_or_else(|| DEFAULT_INPUT_DATE_FORMAT.to_string());
                let output_format = optional_string(field, &config, "output_format")?
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DATE_FORMAT.to_string());
                check_date_format(field, "input_format", &input_format)?;
                check_date_format(field, "output_format", &output_format)?;
                Transform::DateFormat { input_format, output_format }
            }
            "lookup" => Transform::Lookup {
                table: config_object(field, "lookup", raw.transform_config)?,
            },
            kind @ ("suffix" | "prefix") => {
                let config = config_object(field, kind, raw.transform_config)?;
                let value = optional_scalar(field, &config, "value")?.unwrap_or_default();
                let condition = optional_string(field, &config, "condition")?
                    .filter(|c| !c.is_empty())
                    .map(Predicate::new);
                if kind == "suffix" {
                    Transform::Suffix { value, condition }
                } else {
                    Transform::Prefix { value, condition }
                }
            }
            "formula" => {
                let config = config_object(field, "formula", raw.transform_config)?;
                Transform::Formula {
                    expression: optional_string(field, &config, "expression")?.unwrap_or_default(),
                }
            }
            "conditional" => {
                let config = config_object(field, "conditional", raw.transform_config)?;
                Transform::Conditional {
                    branches: parse_branches(field, config.get("conditions"))?,
                }
            }
            other => Transform::Unrecognized {
                kind: other.to_string(),
                config: raw.transform_config,
            },
        };

        Ok(FieldMapping {
            destination_field: raw.destination_field,
            source_field: raw.source_field,
            transform,
        })
    }
}

impl From<FieldMapping> for RawFieldMapping {
    fn from(mapping: FieldMapping) -> Self {
        let transform_type = mapping.transform.kind().to_string();
        let transform_config = match mapping.transform {
            Transform::Direct => json!({}),
            Transform::Constant { value } => json!({ "value": value }),
            Transform::DateFormat { input_format, output_format } => json!({
                "input_format": input_format,
                "output_format": output_format,
            }),
            Transform::Lookup { table } => Value::Object(table),
            Transform::Suffix { value, condition } | Transform::Prefix { value, condition } => {
                let mut config = Map::new();
                config.insert("value".to_string(), Value::String(value));
                if let Some(ref predicate) = condition {
                    config.insert("condition".to_string(), predicate.into());
                }
                Value::Object(config)
            }
            Transform::Formula { expression } => json!({ "expression": expression }),
            Transform::Conditional { branches } => {
                let conditions: Vec<Value> = branches
                    .iter()
                    .map(|b| match b {
                        Branch::When { condition, then } => {
                            json!({ "if": Value::from(condition), "then": then })
                        }
                        Branch::Otherwise(value) => json!({ "else": value }),
                    })
                    .collect();
                json!({ "conditions": conditions })
            }
            Transform::Unrecognized { config, .. } => config,
        };

        RawFieldMapping {
            destination_field: mapping.destination_field,
            source_field: mapping.source_field,
            transform_type,
            transform_config,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidTransform {
        field: field.to_string(),
        message: message.into(),
    }
}

fn config_object(field: &str, kind: &str, config: Value) -> ConfigResult<Map<String, Value>> {
    match config {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(invalid(
            field,
            format!("transform_config for '{}' must be an object, got {}", kind, other),
        )),
    }
}

fn optional_string(field: &str, config: &Map<String, Value>, key: &str) -> ConfigResult<Option<String>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(field, format!("'{}' must be a string, got {}", key, other))),
    }
}

/// String, number or boolean, rendered as text.
fn optional_scalar(field: &str, config: &Map<String, Value>, key: &str) -> ConfigResult<Option<String>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
            Ok(Some(value_text(v).into_owned()))
        }
        Some(other) => Err(invalid(field, format!("'{}' must be a scalar, got {}", key, other))),
    }
}

fn check_date_format(field: &str, key: &str, format: &str) -> ConfigResult<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid(field, format!("invalid {} '{}'", key, format)));
    }
    Ok(())
}

fn parse_branches(field: &str, conditions: Option<&Value>) -> ConfigResult<Vec<Branch>> {
    let entries = match conditions {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(invalid(field, format!("'conditions' must be a list, got {}", other)))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let entry = entry
                .as_object()
                .ok_or_else(|| invalid(field, format!("condition #{} must be an object", i + 1)))?;
            if let Some(condition) = entry.get("if") {
                let condition = condition.as_str().ok_or_else(|| {
                    invalid(field, format!("condition #{}: 'if' must be a string", i + 1))
                })?;
                Ok(Branch::When {
                    condition: Predicate::new(condition),
                    then: entry.get("then").cloned().unwrap_or(Value::Null),
                })
            } else if let Some(value) = entry.get("else") {
                Ok(Branch::Otherwise(value.clone()))
            } else {
                Err(invalid(field, format!("condition #{} needs an 'if' or an 'else' key", i + 1)))
            }
        })
        .collect()
}

// =============================================================================
// Value helpers
// =============================================================================

/// Text of a value as it appears in a CSV cell. `Null` is empty.
pub fn value_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Absent, empty string, `false`, zero and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Revolut stocks → Ghostfolio, the mapping the dashboard seeds a fresh
/// store with.
pub fn example_mapping() -> MappingConfig {
    let mut type_table = Map::new();
    for kind in ["BUY", "SELL", "DIVIDEND"] {
        type_table.insert(kind.to_string(), Value::String(kind.to_string()));
    }
    type_table.insert(LOOKUP_DEFAULT_KEY.to_string(), Value::Null);

    let mut mapping = MappingConfig::new("Revolut Stocks → Ghostfolio")
        .with_field(FieldMapping::new(
            "date",
            Some("Date"),
            Transform::DateFormat {
                input_format: DEFAULT_INPUT_DATE_FORMAT.to_string(),
                output_format: DEFAULT_OUTPUT_DATE_FORMAT.to_string(),
            },
        ))
        .with_field(FieldMapping::direct("symbol", "Ticker"))
        .with_field(FieldMapping::new("type", Some("Type"), Transform::Lookup { table: type_table }))
        .with_field(FieldMapping::direct("quantity", "Quantity"))
        .with_field(FieldMapping::direct("unitPrice", "Price per share"))
        .with_field(FieldMapping::constant("fee", json!(0)))
        .with_field(FieldMapping::direct("currency", "Currency"))
        .with_field(FieldMapping::constant("account", json!("Revolut")))
        .with_field(FieldMapping::constant("dataSource", json!("YAHOO")))
        .with_filter(FilterRule::one_of(
            "Type",
            ["DEPOSIT", "WITHDRAWAL", "CUSTODY FEE", "STOCK SPLIT"],
        ));

    mapping.id = Some("revolut_stocks_to_ghostfolio".to_string());
    mapping.source_id = Some("revolut_stocks".to_string());
    mapping.destination_id = Some("ghostfolio".to_string());
    mapping.description = "Convert Revolut stock trades to Ghostfolio format".to_string();
    mapping
}
