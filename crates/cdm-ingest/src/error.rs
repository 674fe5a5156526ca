//! Error types for source discovery, repair and staging loads.

use std::path::PathBuf;

use thiserror::Error;

use cdm_model::SourceEntity;
use cdm_store::StoreError;

use crate::repair::RepairFailure;

/// Errors that can occur while preparing and loading source extracts.
#[derive(Debug, Error)]
pub enum IngestError {
    // === File System Errors ===
    /// Input directory not found or not readable.
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Failed to read directory entries.
    #[error("failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file the pipeline cannot run without is absent.
    #[error("required input {} not found in {dir}", entity.file_name())]
    MissingRequiredFile { entity: SourceEntity, dir: PathBuf },

    /// Failed to read file.
    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write file.
    #[error("failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === CSV Errors ===
    /// Failed to parse or emit CSV.
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// CSV file has no header row.
    #[error("CSV file is empty: {path}")]
    EmptyCsv { path: PathBuf },

    /// A row of a repaired file does not match its header.
    #[error("{path}: line {line} has {actual} fields, header has {expected}")]
    RowArity {
        path: PathBuf,
        line: u64,
        expected: usize,
        actual: usize,
    },

    // === Repair Errors ===
    /// Repair policy is abort and a row could not be reconstructed.
    #[error("repair aborted in {path}: {failure}")]
    RepairAborted {
        path: PathBuf,
        failure: Box<RepairFailure>,
    },

    // === Load Errors ===
    /// Target staging table already holds rows and the policy says abort.
    #[error(
        "staging table {table} already holds {rows} rows; rerun with --on-existing skip or reload"
    )]
    TargetNotEmpty { table: String, rows: u64 },

    /// Store rejected an operation.
    #[error("store operation failed for {table}: {source}")]
    Store {
        table: String,
        #[source]
        source: StoreError,
    },

    /// Cancellation was requested between two batches.
    #[error("load of {table} cancelled after {loaded} rows")]
    Cancelled { table: String, loaded: u64 },
}

impl IngestError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store(table: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            table: table.into(),
            source,
        }
    }
}

/// Result type for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;
