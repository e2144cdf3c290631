//! # Converter - mapping-driven brokerage export conversion
//!
//! Converts activity exports (Revolut stocks, Revolut crypto, ...) into an
//! import format such as Ghostfolio's, driven by a declarative mapping
//! instead of per-source code.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Input CSV  │────▶│   Parser    │────▶│  Transform   │────▶│ Output CSV  │
//! │ (any enc.)  │     │ (streaming) │     │ (mapping DSL)│     │  (gated)    │
//! └─────────────┘     └─────────────┘     └──────────────┘     └─────────────┘
//!                                                ▲
//!                                   registry (mappings.json)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use converter::{transform_file, MappingRegistry, ProcessOptions};
//!
//! let registry = MappingRegistry::load("data/config")?;
//! let mapping = registry.get("revolut_stocks_to_ghostfolio")?;
//! let result = transform_file("data/in/revolut.csv", "data/out/revolut_ghostfolio.csv", mapping, &ProcessOptions::default());
//! println!("{}", result.summary());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`logs`] - Log entries attached to results
//! - [`parser`] - CSV reading/writing with encoding and delimiter handling
//! - [`transform`] - Mapping DSL, file pipeline, batch runner
//! - [`registry`] - Read-only mapping store

// Core modules
pub mod error;
pub mod logs;

// Table IO
pub mod parser;

// Transformation
pub mod transform;

// Mapping store
pub mod registry;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    BatchError, ConfigError, ExpressionError, RegistryError, TableError,
};

// =============================================================================
// Re-exports - Logging
// =============================================================================

pub use logs::{LogEntry, LogLevel};

// =============================================================================
// Re-exports - Table IO
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, write_table, InputFormat, InputTable,
    RowReadError, TableRow,
};

// =============================================================================
// Re-exports - DSL
// =============================================================================

pub use transform::dsl::{
    example_mapping, transform_row, transforms_description, Applied, Branch, Condition,
    FieldMapping, FilterOperator, FilterRule, MappingConfig, Predicate, Row, RowError,
    RowOutcome, Transform,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{transform_file, validate_file, ProcessOptions, TransformResult};

pub use transform::batch::{
    output_name, plan_directory, transform_directory, transform_files, BatchOptions,
    BatchSummary, FileJob, FileOutcome,
};

// =============================================================================
// Re-exports - Registry
// =============================================================================

pub use registry::{InvalidEntry, MappingRegistry, MAPPINGS_FILE};
