//! Error types for store operations.

use thiserror::Error;

/// Errors raised by a [`Store`](crate::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is busy or locked by another writer.
    #[error("store busy during {operation}: {message}")]
    Busy {
        operation: &'static str,
        message: String,
    },

    /// The operation did not finish in time.
    #[error("store timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("table {table} already exists with a different schema")]
    SchemaConflict { table: String },

    #[error("row {row} for table {table} has {actual} values but the table has {expected} columns")]
    ArityMismatch {
        table: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("constraint violated in {operation}: {message}")]
    Constraint {
        operation: &'static str,
        message: String,
    },

    #[error("store state lock poisoned")]
    Poisoned,

    #[error("store backend error: {message}")]
    Backend { message: String },

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only contention and timeouts are transient; everything else is
    /// permanent and fails the stage immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
