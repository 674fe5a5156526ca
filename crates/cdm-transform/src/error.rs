//! Error types for domain transforms.

use std::path::PathBuf;

use thiserror::Error;

use cdm_map::MapError;
use cdm_store::StoreError;

/// Errors raised while building normalized tables.
#[derive(Debug, Error)]
pub enum TransformError {
    // === Precondition Errors ===
    /// A staged table the transform reads has not been loaded.
    #[error("staged table {table} does not exist; run the staging load first")]
    MissingStagedTable { table: String },

    /// A staged table lacks a column the transform reads.
    #[error("staged table {table} has no column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A normalized table the transform reads has not been built.
    #[error("table {table} does not exist; run the {stage} stage first")]
    MissingTarget { table: String, stage: &'static str },

    // === Execution Errors ===
    #[error("store operation on {table} failed: {source}")]
    Store {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("{transform} cancelled after {written} rows")]
    Cancelled {
        transform: &'static str,
        written: u64,
    },

    #[error("failed to write {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize validation report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransformError {
    pub(crate) fn store(table: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            table: table.into(),
            source,
        }
    }

    /// Whether the transform could not start because an input is absent.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingStagedTable { .. } | Self::MissingColumn { .. } | Self::MissingTarget { .. }
        )
    }
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;
