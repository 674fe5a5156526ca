//! Error types for checkpointing and orchestration.

use std::path::PathBuf;

use thiserror::Error;

use cdm_map::MapError;
use cdm_store::StoreError;

/// Errors reading or writing the checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to {operation} checkpoint {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document stayed unparseable across every re-read.
    #[error("checkpoint {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to replace {target} with {temp}: {source}")]
    AtomicWriteFailed {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stage cannot start because something it needs is absent.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("stage {stage} requires {dependency}, which has not completed")]
    DependencyIncomplete {
        stage: &'static str,
        dependency: &'static str,
    },

    #[error("input directory {0} does not exist")]
    InputDirectory(PathBuf),

    #[error("vocabulary file {0} does not exist")]
    Vocabulary(PathBuf),

    #[error("repaired file {0} is missing; re-run the repair stage")]
    RepairedFile(PathBuf),
}

/// Errors that stop the orchestrator itself, as opposed to a stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to load vocabulary: {0}")]
    Vocabulary(#[from] MapError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for orchestration.
pub type Result<T> = std::result::Result<T, PipelineError>;
