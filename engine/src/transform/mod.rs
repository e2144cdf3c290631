//! Transformation module.
//!
//! This module handles mapping-driven conversion:
//! - DSL: Mapping configuration, transforms, filters, row processing
//! - Pipeline: One file pass with error gating
//! - Batch: Concurrent passes over a directory

pub mod batch;
pub mod dsl;
pub mod pipeline;

pub use batch::*;
pub use dsl::*;
pub use pipeline::*;
