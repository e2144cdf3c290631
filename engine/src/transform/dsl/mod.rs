//! Mapping DSL
//!
//! This module provides:
//! - `mapping`: Mapping configuration (what the user edits)
//! - `condition`: `field == 'x'` style predicates
//! - `formula`: Arithmetic over row fields
//! - `operations`: The eight field transforms
//! - `filter`: Row skip rules
//! - `executor`: Apply a mapping to one row
//!
//! ## Usage Flow
//!
//! ```text
//! mappings.json → MappingConfig → executor::transform_row (per row) → RowOutcome
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use converter::transform::dsl::{example_mapping, transform_row, RowOutcome};
//!
//! let mapping = example_mapping();
//! let row = serde_json::json!({"Date": "2020-02-03T09:18:39", "Type": "BUY"});
//!
//! match transform_row(row.as_object().unwrap(), &mapping, 2) {
//!     RowOutcome::Skipped => println!("filtered out"),
//!     RowOutcome::Transformed { row, errors } => println!("{:?} ({} errors)", row, errors.len()),
//! }
//! ```

pub mod condition;
pub mod executor;
pub mod filter;
pub mod formula;
pub mod mapping;
pub mod operations;

// Re-exports for convenience
pub use condition::{Condition, Predicate};
pub use executor::{transform_row, RowError, RowOutcome, WHOLE_ROW};
pub use filter::{first_match, should_skip, FilterOperator, FilterRule};
pub use formula::{BinaryOp, Expr};
pub use mapping::{
    example_mapping, is_truthy, value_text, Branch, FieldMapping, MappingConfig, Row, Transform,
};
pub use operations::{transforms_description, Applied};
