#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harmonisation of the mapping-source and register inventories.
//!
//! Loads the attribute table, joins it onto the normalised mapping layer,
//! then fills capacity gaps stage by stage (cross-source coalesce, area
//! regression, floor estimate) and classifies installations by size. Each
//! stage returns a new record table together with its diagnostics.

pub mod attributes;
pub mod capacity;
pub mod category;
pub mod merge;
pub mod progress;
pub mod summary;

use thiserror::Error;

/// Errors that can occur while harmonising the inventories.
#[derive(Debug, Error)]
pub enum HarmonizeError {
    /// File could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing failed outside of a single recoverable row.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the input.
    #[error("Schema violation: {message}")]
    SchemaViolation {
        /// Description of what went wrong.
        message: String,
    },

    /// A postcondition of a merge or fill stage failed.
    #[error("Data integrity error: {message}")]
    DataIntegrity {
        /// Description of what went wrong.
        message: String,
    },
}
