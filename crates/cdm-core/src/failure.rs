//! Classification of stage failures.

use serde::{Deserialize, Serialize};

use cdm_ingest::IngestError;
use cdm_map::MapError;
use cdm_store::StoreError;
use cdm_transform::TransformError;

use crate::error::PreconditionError;

/// Broad class of a stage failure, used for exit codes and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An input or prerequisite stage is missing.
    Precondition,
    /// The run was interrupted.
    Cancelled,
    /// Key mapping state is inconsistent; needs manual reconciliation.
    MappingConflict,
    /// The store rejected an operation after retries.
    Store,
    /// A malformed row aborted its file.
    Repair,
    Other,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Cancelled => "cancelled",
            Self::MappingConflict => "mapping_conflict",
            Self::Store => "store",
            Self::Repair => "repair",
            Self::Other => "other",
        }
    }
}

/// Walks the error chain and returns the first recognized class.
pub fn classify(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if cause.downcast_ref::<PreconditionError>().is_some() {
            return FailureKind::Precondition;
        }
        if let Some(err) = cause.downcast_ref::<IngestError>() {
            return match err {
                IngestError::DirectoryNotFound { .. } | IngestError::MissingRequiredFile { .. } => {
                    FailureKind::Precondition
                }
                IngestError::RepairAborted { .. } => FailureKind::Repair,
                IngestError::Cancelled { .. } => FailureKind::Cancelled,
                IngestError::Store { .. } => FailureKind::Store,
                _ => FailureKind::Other,
            };
        }
        if let Some(err) = cause.downcast_ref::<TransformError>() {
            if err.is_precondition() {
                return FailureKind::Precondition;
            }
            return match err {
                TransformError::Cancelled { .. } => FailureKind::Cancelled,
                TransformError::Store { .. } => FailureKind::Store,
                TransformError::Map(err) => classify_map(err),
                _ => FailureKind::Other,
            };
        }
        if let Some(err) = cause.downcast_ref::<MapError>() {
            return classify_map(err);
        }
        if cause.downcast_ref::<StoreError>().is_some() {
            return FailureKind::Store;
        }
    }
    FailureKind::Other
}

fn classify_map(err: &MapError) -> FailureKind {
    if err.is_conflict() {
        return FailureKind::MappingConflict;
    }
    match err {
        MapError::Store { .. } => FailureKind::Store,
        _ => FailureKind::Other,
    }
}
