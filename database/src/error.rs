//! Store error types
//!
//! Errors fall in two families. Validation errors (`InvalidQueryShape`,
//! `Validation`, `Model`) are raised before any storage access. Storage
//! errors (`Write`, `Storage`, `Sql`, `Decode`) carry enough context to
//! identify the failed table and batch for manual reconciliation.

use std::fmt;

use thiserror::Error;
use trade_views_core::ModelError;

/// Store-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid query shape: {0}")]
    InvalidQueryShape(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Write(WriteFailure),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Row decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl StoreError {
    /// True for errors raised before touching storage
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidQueryShape(_) | StoreError::Validation(_) | StoreError::Model(_)
        )
    }

    /// True for errors reported by (or while talking to) the substrate
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Write(_)
                | StoreError::Storage(_)
                | StoreError::Sql(_)
                | StoreError::Decode(_)
        )
    }
}

/// One batch the substrate rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Table the batch targeted
    pub table: &'static str,
    /// Zero-based batch index within the table's batch sequence
    pub batch: usize,
    /// Substrate error message
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} batch {}: {}", self.table, self.batch, self.message)
    }
}

/// Every batch failure of one write operation.
///
/// `attempted` counts all batches submitted, so callers can tell a partial
/// fan-out (some views written) from a total failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub attempted: usize,
    pub failures: Vec<BatchFailure>,
}

impl WriteFailure {
    /// True when at least one batch of the operation was written
    pub fn is_partial(&self) -> bool {
        self.failures.len() < self.attempted
    }

    /// Tables with at least one failed batch, in first-failure order
    pub fn failed_tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<&'static str> = Vec::new();
        for failure in &self.failures {
            if !tables.contains(&failure.table) {
                tables.push(failure.table);
            }
        }
        tables
    }
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Write error: {} of {} batches failed",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

/// Type alias for store results
pub type StoreResult<T> = Result<T, StoreError>;
