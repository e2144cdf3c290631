//! Field transforms
//!
//! Applies one [`Transform`] to the raw value of a row. Transforms never
//! fail hard: a problem is reported next to the value so the caller can
//! attach line context and keep assembling the row.

use std::fmt::Write;

use chrono::format::{parse, Fixed, Item, Numeric, Parsed, StrftimeItems};
use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::condition::Predicate;
use super::formula;
use super::mapping::{is_truthy, value_text, Branch, Row, Transform, LOOKUP_DEFAULT_KEY};

/// Sub-second fraction right after a `HH:MM:SS` time.
static FRACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2})\.\d+").expect("valid fraction regex"));

/// Output of a single transform
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub value: Value,
    /// Field-level problem, without line context
    pub error: Option<String>,
}

impl Applied {
    fn ok(value: Value) -> Self {
        Self { value, error: None }
    }

    fn failed(value: Value, error: impl Into<String>) -> Self {
        Self { value, error: Some(error.into()) }
    }
}

impl Transform {
    /// Derive the destination value from `source` (the raw value of the
    /// mapping's source field, `Null` when absent) and the full raw row.
    pub fn apply(&self, source: &Value, row: &Row) -> Applied {
        match self {
            Transform::Direct | Transform::Unrecognized { .. } => Applied::ok(source.clone()),
            Transform::Constant { value } => Applied::ok(value.clone()),
            Transform::DateFormat { input_format, output_format } => {
                apply_date_format(source, input_format, output_format)
            }
            Transform::Lookup { table } => apply_lookup(source, table),
            Transform::Suffix { value, condition } => {
                apply_affix(source, row, condition.as_ref(), |s| format!("{}{}", s, value))
            }
            Transform::Prefix { value, condition } => {
                apply_affix(source, row, condition.as_ref(), |s| format!("{}{}", value, s))
            }
            Transform::Formula { expression } => match formula::evaluate(expression, row) {
                Ok(result) => Applied::ok(Value::from(result)),
                Err(err) => Applied::failed(
                    Value::Null,
                    format!("Formula evaluation failed: {} ({})", expression, err),
                ),
            },
            Transform::Conditional { branches } => Applied::ok(apply_conditional(branches, row)),
        }
    }
}

fn apply_date_format(source: &Value, input_format: &str, output_format: &str) -> Applied {
    if !is_truthy(source) {
        return Applied::ok(Value::Null);
    }

    let raw = value_text(source);
    let mut text = raw.to_string();
    if text.contains('T') && text.contains('Z') {
        text = text.replace('Z', "");
    }
    let text = FRACTION_RE.replace(&text, "$1");

    match reformat_date(&text, input_format, output_format) {
        Ok(formatted) => Applied::ok(Value::String(formatted)),
        Err(reason) => Applied::failed(source.clone(), format!("Date format error: {}", reason)),
    }
}

fn reformat_date(text: &str, input_format: &str, output_format: &str) -> Result<String, String> {
    let mut parsed = Parsed::new();
    parse(&mut parsed, text, StrftimeItems::new(input_format)).map_err(|e| {
        format!("time data '{}' does not match format '{}': {}", text, input_format, e)
    })?;

    let date = parsed
        .to_naive_date()
        .map_err(|e| format!("time data '{}' has no complete date: {}", text, e))?;
    let time = time_of(&mut parsed, &TimeFields::of(input_format))
        .map_err(|e| format!("time data '{}' has no usable time: {}", text, e))?;
    let datetime = date.and_time(time);

    let mut out = String::new();
    write!(out, "{}", datetime.format(output_format))
        .map_err(|_| format!("cannot render with format '{}'", output_format))?;
    Ok(out)
}

/// Time fields an input format can fill.
#[derive(Debug, Default)]
struct TimeFields {
    hour: bool,
    hour12: bool,
    meridiem: bool,
    minute: bool,
    second: bool,
    /// RFC 2822 / 3339 carry the whole time
    complete: bool,
}

impl TimeFields {
    fn of(format: &str) -> Self {
        let mut fields = Self::default();
        for item in StrftimeItems::new(format) {
            match item {
                Item::Numeric(Numeric::Hour, _) => fields.hour = true,
                Item::Numeric(Numeric::Hour12, _) => fields.hour12 = true,
                Item::Numeric(Numeric::Minute, _) => fields.minute = true,
                Item::Numeric(Numeric::Second | Numeric::Nanosecond, _) => fields.second = true,
                Item::Fixed(Fixed::LowerAmPm | Fixed::UpperAmPm) => fields.meridiem = true,
                Item::Fixed(Fixed::RFC2822 | Fixed::RFC3339) => fields.complete = true,
                _ => {}
            }
        }
        fields
    }

    fn any(&self) -> bool {
        self.hour || self.hour12 || self.minute || self.second || self.complete
    }
}

/// Midnight when the format has no time at all. A partial time is completed
/// like `strptime`: missing hour or minute is 0, `%I` without `%p` is AM.
fn time_of(parsed: &mut Parsed, fields: &TimeFields) -> chrono::format::ParseResult<NaiveTime> {
    if !fields.any() {
        return Ok(NaiveTime::default());
    }
    if !fields.complete {
        if !fields.hour && !fields.hour12 {
            parsed.set_hour(0)?;
        } else if fields.hour12 && !fields.hour && !fields.meridiem {
            parsed.set_ampm(false)?;
        }
        if !fields.minute {
            parsed.set_minute(0)?;
        }
    }
    parsed.to_naive_time()
}

fn apply_lookup(source: &Value, table: &Map<String, Value>) -> Applied {
    let default = table.get(LOOKUP_DEFAULT_KEY).cloned().unwrap_or(Value::Null);
    if source.is_null() {
        return Applied::ok(default);
    }

    let key = value_text(source);
    match table.get(key.as_ref()) {
        Some(found) => Applied::ok(found.clone()),
        None if default.is_null() => {
            Applied::failed(Value::Null, "Lookup value not found in mapping table")
        }
        None => Applied::ok(default),
    }
}

fn apply_affix(
    source: &Value,
    row: &Row,
    condition: Option<&Predicate>,
    join: impl FnOnce(&str) -> String,
) -> Applied {
    if !is_truthy(source) {
        return Applied::ok(Value::Null);
    }
    if condition.is_some_and(|c| !c.evaluate(row)) {
        return Applied::ok(source.clone());
    }
    Applied::ok(Value::String(join(&value_text(source))))
}

fn apply_conditional(branches: &[Branch], row: &Row) -> Value {
    for branch in branches {
        match branch {
            Branch::When { condition, then } => {
                if condition.evaluate(row) {
                    return then.clone();
                }
            }
            Branch::Otherwise(value) => return value.clone(),
        }
    }
    Value::Null
}

/// Help text listing every transform kind and its parameters
pub fn transforms_description() -> String {
    r#"Available field transforms:

| transform_type | Description | transform_config |
|----------------|-------------|------------------|
| direct | Copy the source value unchanged | - |
| constant | Fixed value, source ignored | value: any JSON value |
| date_format | Re-render a date/time | input_format (default "%Y-%m-%dT%H:%M:%S"), output_format (default "%Y-%m-%d") |
| lookup | Map source values through a table | {source: target, ..., "_default": fallback} |
| suffix | Append text to a non-empty value | value: text, condition: optional condition |
| prefix | Prepend text to a non-empty value | value: text, condition: optional condition |
| formula | Arithmetic over row fields | expression: e.g. "Quantity * Price per share" |
| conditional | First matching branch wins | conditions: [{"if": cond, "then": v}, {"else": v}] |

Conditions: field == 'x', field != 'x', field in ['a', 'b']
Formulas: + - * / ( ), numbers and column names; non-numeric values count as 0

Filter operators: equals, not_equals, in, not_in, is_empty, is_not_empty, contains
(a row is skipped when any rule matches)

Example field mappings in JSON:
[
  {"destination_field": "date", "source_field": "Date", "transform_type": "date_format",
   "transform_config": {"input_format": "%b %d, %Y, %I:%M:%S %p"}},
  {"destination_field": "type", "source_field": "Type", "transform_type": "lookup",
   "transform_config": {"Buy": "BUY", "Sell": "SELL", "_default": null}},
  {"destination_field": "symbol", "source_field": "Symbol", "transform_type": "suffix",
   "transform_config": {"value": "-USD"}}
]"#
    .to_string()
}
