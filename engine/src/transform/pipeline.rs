//! File processor: one mapping over one input table.
//!
//! Reads the table row by row, runs the row processor, and accumulates
//! counts, [`RowError`]s and log lines in a [`TransformResult`]. Nothing in
//! here returns an error: read and write failures end up in the log.
//!
//! # Example
//!
//! ```rust,ignore
//! use converter::transform::{example_mapping, transform_file, ProcessOptions};
//!
//! let mapping = example_mapping();
//! let result = transform_file("in/revolut.csv", "out/revolut_ghostfolio.csv", &mapping, &ProcessOptions::default());
//!
//! for line in result.log_lines() {
//!     println!("{}", line);
//! }
//! println!("{}", result.summary());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::logs::{LogEntry, LogLevel};
use crate::parser::{write_table, InputFormat, InputTable, RowReadError, TableRow};
use crate::transform::dsl::{transform_row, MappingConfig, Row, RowError, RowOutcome};

/// Options for one file pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Withhold the output file when any field error occurred
    pub fail_on_error: bool,

    /// Delimiter and encoding of the input table
    pub input: InputFormat,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            fail_on_error: true,
            input: InputFormat::default(),
        }
    }
}

/// Outcome of a file pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    /// Rows transformed without any error
    pub success_count: usize,

    /// Rows dropped by a filter rule
    pub skipped_count: usize,

    /// Number of errors (not rows)
    pub error_count: usize,

    /// Data records read, decodable or not
    pub rows_read: usize,

    /// Whether an output table was written
    pub output_written: bool,

    /// Reason the pass stopped early (unreadable input, failed task)
    #[serde(default)]
    pub failure: Option<String>,

    /// Errors in line order
    pub errors: Vec<RowError>,

    pub logs: Vec<LogEntry>,
}

impl TransformResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    pub fn add_error(&mut self, error: RowError) {
        self.errors.push(error);
        self.error_count += 1;
    }

    /// Log messages as plain lines
    pub fn log_lines(&self) -> Vec<String> {
        self.logs.iter().map(|entry| entry.message.clone()).collect()
    }

    /// Entries at `level`
    pub fn logs_at(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |entry| entry.level == level)
    }

    /// Record a terminal failure; the pass produces nothing further.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log(LogEntry::error(format!("ERROR: {}", reason)));
        self.failure = Some(reason);
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Check if the pass completed without errors
    pub fn is_ok(&self) -> bool {
        self.error_count == 0 && self.failure.is_none()
    }

    /// Distinct input lines that carry at least one error
    pub fn rows_with_errors(&self) -> usize {
        self.errors
            .iter()
            .map(|e| e.line_number)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "{} valid, {} skipped, {} errors",
            self.success_count, self.skipped_count, self.error_count
        )
    }
}

enum Mode<'a> {
    Validate,
    Transform { output: &'a Path },
}

impl Mode<'_> {
    fn verb(&self) -> &'static str {
        match self {
            Mode::Validate => "Validating",
            Mode::Transform { .. } => "Transforming",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Mode::Validate => "Validation",
            Mode::Transform { .. } => "Transformation",
        }
    }

    fn row_ok(&self) -> &'static str {
        match self {
            Mode::Validate => "Valid",
            Mode::Transform { .. } => "Transformed successfully",
        }
    }
}

/// Dry run: full result, never writes.
pub fn validate_file(
    input: impl AsRef<Path>,
    mapping: &MappingConfig,
    options: &ProcessOptions,
) -> TransformResult {
    process_file(input.as_ref(), mapping, options, Mode::Validate)
}

/// Transform `input` and write `output`, unless errors occurred and
/// `options.fail_on_error` is set.
pub fn transform_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    mapping: &MappingConfig,
    options: &ProcessOptions,
) -> TransformResult {
    process_file(
        input.as_ref(),
        mapping,
        options,
        Mode::Transform { output: output.as_ref() },
    )
}

fn process_file(input: &Path, mapping: &MappingConfig, options: &ProcessOptions, mode: Mode<'_>) -> TransformResult {
    let mut result = TransformResult::new();

    result.log(LogEntry::info(format!("{} {}", mode.verb(), file_name(input))));
    result.log(LogEntry::info(format!("Using mapping: {}", mapping.name)));
    result.log(LogEntry::info(format!(
        "Field mappings: {}, Filter rules: {}",
        mapping.field_mappings.len(),
        mapping.filter_rules.len()
    )));
    for warning in mapping.warnings() {
        result.log(LogEntry::warning(warning));
    }

    let table = match InputTable::open(input, &options.input) {
        Ok(table) => table,
        Err(err) => {
            result.fail(format!("Failed to read input file: {}", err));
            return result;
        }
    };

    result.log(LogEntry::info(format!("Source columns: {}", table.headers().join(", "))));
    let missing = mapping.missing_columns(table.headers());
    if !missing.is_empty() {
        result.log(LogEntry::warning(format!(
            "Columns referenced by the mapping but missing from the file: {}",
            missing.join(", ")
        )));
    }

    let mut buffered: Vec<Row> = Vec::new();

    for item in table {
        match item {
            Ok(TableRow { line_number, row }) => {
                result.rows_read += 1;
                match transform_row(&row, mapping, line_number) {
                    RowOutcome::Skipped => {
                        result.skipped_count += 1;
                        result.log(LogEntry::info(format!("Line {}: Skipped (filtered out)", line_number)));
                    }
                    RowOutcome::Transformed { row, errors } => {
                        if errors.is_empty() {
                            result.success_count += 1;
                            result.log(LogEntry::success(format!("Line {}: {}", line_number, mode.row_ok())));
                        } else {
                            let count = errors.len();
                            for error in errors {
                                result.add_error(error);
                            }
                            result.log(LogEntry::warning(format!("Line {}: Has {} error(s)", line_number, count)));
                        }
                        buffered.push(row);
                    }
                }
            }
            Err(RowReadError::Undecodable { line_number, message, snapshot }) => {
                result.rows_read += 1;
                result.add_error(
                    RowError::whole_row(line_number, format!("Row processing failed: {}", message))
                        .with_row(snapshot),
                );
                result.log(LogEntry::error(format!("Line {}: Row processing failed", line_number)));
            }
            Err(RowReadError::Fatal(err)) => {
                result.fail(format!("Failed to read input file: {}", err));
                return result;
            }
        }
    }

    if let Mode::Transform { output } = mode {
        write_output(&mut result, output, &buffered, options.fail_on_error);
    }

    let summary = format!("{} complete: {}", mode.noun(), result.summary());
    result.log(if result.is_ok() {
        LogEntry::success(summary)
    } else {
        LogEntry::warning(summary)
    });
    result
}

fn write_output(result: &mut TransformResult, output: &Path, rows: &[Row], fail_on_error: bool) {
    if rows.is_empty() {
        result.log(LogEntry::info("No rows to write, output not created"));
        return;
    }
    if result.error_count > 0 && fail_on_error {
        result.log(LogEntry::warning(format!(
            "OUTPUT SKIPPED: {} errors found. Fix errors before converting.",
            result.error_count
        )));
        return;
    }

    match write_table(output, rows) {
        Ok(_) => {
            result.output_written = true;
            result.log(LogEntry::success(format!("Output written to {}", file_name(output))));
        }
        Err(err) => {
            result.log(LogEntry::error(format!(
                "ERROR: Failed to write output file {}: {}",
                file_name(output),
                err
            )));
        }
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::dsl::{example_mapping, FieldMapping};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "Date,Ticker,Type,Quantity,Price per share,Total Amount,Currency,FX Rate";

    fn write_input(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();
        path
    }

    fn three_rows(dir: &Path) -> std::path::PathBuf {
        write_input(
            dir,
            "revolut.csv",
            &[
                HEADER,
                "2020-02-03T09:18:39.254Z,AAPL,BUY,3,150.25,450.75,USD,1.0",
                "03/02/2020,MSFT,BUY,1,170,170,USD,1.0",
                "2020-02-04T10:00:00Z,,DEPOSIT,,,1000,USD,1.0",
            ],
        )
    }

    #[test]
    fn test_end_to_end_gating() {
        let dir = tempdir().unwrap();
        let input = three_rows(dir.path());
        let output = dir.path().join("out").join("revolut_ghostfolio.csv");

        let result = transform_file(&input, &output, &example_mapping(), &ProcessOptions::default());

        assert_eq!(result.success_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.rows_read, 3);
        assert!(!result.output_written);
        assert!(!output.exists());

        let error = &result.errors[0];
        assert_eq!(error.line_number, 3);
        assert_eq!(error.field, "date");
        assert_eq!(error.source_value.as_deref(), Some("03/02/2020"));

        let lines = result.log_lines();
        assert_eq!(lines[0], "Transforming revolut.csv");
        assert_eq!(lines[1], "Using mapping: Revolut Stocks → Ghostfolio");
        assert_eq!(lines[2], "Field mappings: 9, Filter rules: 1");
        assert!(lines.contains(&"Line 2: Transformed successfully".to_string()));
        assert!(lines.contains(&"Line 3: Has 1 error(s)".to_string()));
        assert!(lines.contains(&"Line 4: Skipped (filtered out)".to_string()));
        assert!(lines.contains(&"OUTPUT SKIPPED: 1 errors found. Fix errors before converting.".to_string()));
        assert_eq!(
            lines.last().unwrap(),
            "Transformation complete: 1 valid, 1 skipped, 1 errors"
        );
    }

    #[test]
    fn test_write_despite_errors_when_allowed() {
        let dir = tempdir().unwrap();
        let input = three_rows(dir.path());
        let output = dir.path().join("out.csv");
        let options = ProcessOptions { fail_on_error: false, ..Default::default() };

        let result = transform_file(&input, &output, &example_mapping(), &options);

        assert!(result.output_written);
        let content = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "date,symbol,type,quantity,unitPrice,fee,currency,account,dataSource");
        assert_eq!(lines[1], "2020-02-03,AAPL,BUY,3,150.25,0,USD,Revolut,YAHOO");
        assert_eq!(lines[2], "03/02/2020,MSFT,BUY,1,170,0,USD,Revolut,YAHOO");
        assert_eq!(lines.len(), 3);
        assert!(result.log_lines().contains(&"Output written to out.csv".to_string()));
    }

    #[test]
    fn test_validate_never_writes() {
        let dir = tempdir().unwrap();
        let input = write_input(
            dir.path(),
            "clean.csv",
            &[HEADER, "2020-02-03T09:18:39,AAPL,BUY,3,150.25,450.75,USD,1.0"],
        );

        let result = validate_file(&input, &example_mapping(), &ProcessOptions::default());

        assert!(result.is_ok());
        assert!(!result.output_written);
        let lines = result.log_lines();
        assert_eq!(lines[0], "Validating clean.csv");
        assert!(lines.contains(&"Line 2: Valid".to_string()));
        assert_eq!(lines.last().unwrap(), "Validation complete: 1 valid, 0 skipped, 0 errors");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let dir = tempdir().unwrap();
        let input = three_rows(dir.path());
        let mapping = example_mapping();

        let first = validate_file(&input, &mapping, &ProcessOptions::default());
        let second = validate_file(&input, &mapping, &ProcessOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_undecodable_row_is_whole_row_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        let mut bytes = format!("{}\n", HEADER).into_bytes();
        bytes.extend_from_slice(b"2020-02-03T09:18:39,\xFF\xFF,BUY,3,150.25,450.75,USD,1.0\n");
        bytes.extend_from_slice(b"2020-02-03T09:18:39,AAPL,BUY,3,150.25,450.75,USD,1.0\n");
        fs::write(&path, bytes).unwrap();

        let result = validate_file(&path, &example_mapping(), &ProcessOptions::default());

        assert_eq!(result.rows_read, 2);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 1);
        assert!(result.errors[0].is_whole_row());
        assert_eq!(result.errors[0].line_number, 2);
        assert_eq!(result.errors[0].row_data["Type"], "BUY");
        assert!(result.log_lines().contains(&"Line 2: Row processing failed".to_string()));
        assert_eq!(result.success_count + result.skipped_count + result.rows_with_errors(), result.rows_read);
    }

    #[test]
    fn test_missing_input_is_read_failure() {
        let dir = tempdir().unwrap();
        let result = transform_file(
            dir.path().join("missing.csv"),
            dir.path().join("out.csv"),
            &example_mapping(),
            &ProcessOptions::default(),
        );

        assert_eq!(result.rows_read, 0);
        assert_eq!(result.error_count, 0);
        assert!(result.is_failed());
        assert!(!result.is_ok());
        assert!(!result.output_written);
        let last = result.log_lines().pop().unwrap();
        assert!(last.starts_with("ERROR: Failed to read input file:"));
        assert_eq!(result.logs_at(LogLevel::Error).count(), 1);
    }

    #[test]
    fn test_empty_input_is_read_failure() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty.csv");
        fs::write(&input, "").unwrap();

        let result = validate_file(&input, &example_mapping(), &ProcessOptions::default());
        assert!(result.log_lines().last().unwrap().contains("No header row found"));
        assert!(!result.is_ok());
        assert!(result.failure.as_deref().is_some_and(|r| r.starts_with("Failed to read input file")));
    }

    #[test]
    fn test_all_rows_filtered_writes_nothing() {
        let dir = tempdir().unwrap();
        let input = write_input(
            dir.path(),
            "deposits.csv",
            &[HEADER, "2020-02-04T10:00:00Z,,DEPOSIT,,,1000,USD,1.0"],
        );
        let output = dir.path().join("out.csv");

        let result = transform_file(&input, &output, &example_mapping(), &ProcessOptions::default());
        assert_eq!(result.skipped_count, 1);
        assert!(!output.exists());
        assert!(result.log_lines().iter().any(|l| l.starts_with("No rows to write")));
    }

    #[test]
    fn test_mapping_warnings_logged() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path(), "t.csv", &["Ticker", "AAPL"]);
        let mapping = MappingConfig::new("warn")
            .with_field(FieldMapping::direct("symbol", "Ticker"))
            .with_field(FieldMapping::direct("symbol", "Symbol"))
            .with_field(FieldMapping::constant("fee", json!(0)));

        let result = validate_file(&input, &mapping, &ProcessOptions::default());
        let warnings: Vec<&LogEntry> = result.logs_at(LogLevel::Warning).collect();
        assert!(warnings.iter().any(|w| w.message.contains("Duplicate destination field 'symbol'")));
        assert!(warnings.iter().any(|w| w.message.ends_with("missing from the file: Symbol")));
        // Symbol is missing, so the later mapping sets symbol to empty
        assert_eq!(result.success_count, 1);
    }

    #[test]
    fn test_semicolon_input() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path(), "t.csv", &["Ticker;Currency", "AAPL;USD"]);
        let output = dir.path().join("o.csv");
        let mapping = MappingConfig::new("m")
            .with_field(FieldMapping::direct("symbol", "Ticker"))
            .with_field(FieldMapping::direct("currency", "Currency"));
        let options = ProcessOptions {
            input: InputFormat { delimiter: Some(';'), encoding: Some("utf-8".into()) },
            ..Default::default()
        };

        let result = transform_file(&input, &output, &mapping, &options);
        assert!(result.output_written);
        assert_eq!(fs::read_to_string(&output).unwrap(), "symbol,currency\nAAPL,USD\n");
    }
}
