//! Error types for the converter engine.
//!
//! This module defines one error type per concern:
//!
//! - [`ConfigError`] - Mapping configuration loading and validation
//! - [`TableError`] - Input/output table IO
//! - [`ExpressionError`] - Condition and formula parsing/evaluation
//! - [`RegistryError`] - Mapping store errors
//! - [`BatchError`] - Directory batch orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! None of these ever escape a file pass: the file processor turns them into
//! log lines and [`RowError`](crate::transform::dsl::RowError)s.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading or validating a mapping configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read mapping file: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed JSON, or a field/filter that failed load-time validation.
    #[error("Invalid mapping JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A field mapping whose transform parameters are unusable.
    #[error("Invalid transform for field '{field}': {message}")]
    InvalidTransform { field: String, message: String },

    /// A filter rule missing the operands its operator needs.
    #[error("Invalid filter rule on '{field}': {message}")]
    InvalidFilter { field: String, message: String },

    /// Mapping declares no destination fields.
    #[error("Mapping '{0}' has no field mappings")]
    NoFieldMappings(String),
}

// =============================================================================
// Table Errors
// =============================================================================

/// Errors while reading the input table or writing the output table.
#[derive(Debug, Error)]
pub enum TableError {
    /// Failed to open, read or write a file.
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    /// CSV reader/writer error.
    #[error("{0}")]
    CsvError(#[from] csv::Error),

    /// Unsupported or undecodable text encoding.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// File has no header row.
    #[error("No header row found")]
    NoHeaders,

    /// Delimiter the CSV reader cannot use.
    #[error("Invalid delimiter '{0}': must be a single ASCII character")]
    InvalidDelimiter(char),
}

// =============================================================================
// Expression Errors
// =============================================================================

/// Errors from the condition and formula mini-languages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Nothing to parse.
    #[error("empty expression")]
    Empty,

    /// Character that starts no valid token.
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// Token that does not fit the grammar at this point.
    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    /// Input ended in the middle of an expression.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Quoted literal without closing quote.
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    /// Numeric literal that does not parse.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// Division with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// Result is infinite or NaN.
    #[error("result is not a finite number")]
    NonFinite,
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the mapping store.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Mapping not found.
    #[error("Mapping not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("Registry IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error, including mapping validation failures.
    #[error("Registry JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Stored mapping that failed validation when the store was loaded.
    #[error("Stored mapping '{id}' is invalid: {reason}")]
    InvalidMapping { id: String, reason: String },
}

// =============================================================================
// Batch Errors
// =============================================================================

/// Errors that prevent a batch from starting.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Input directory cannot be listed.
    #[error("Cannot scan input directory '{path}': {source}")]
    ScanFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Mapping has no destination id to derive output names from.
    #[error("Mapping '{0}' has no destination_id and no output suffix was given")]
    NoOutputSuffix(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Result type for expression parsing/evaluation.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for batch orchestration.
pub type BatchResult<T> = Result<T, BatchError>;
