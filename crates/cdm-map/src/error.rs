//! Error types for key and concept mapping.

use std::path::PathBuf;

use thiserror::Error;

use cdm_model::EntityKind;
use cdm_store::StoreError;

/// Errors from mapping operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// Two internal keys were observed for one external key.
    ///
    /// The store's insert-if-absent primitive rules this out; seeing it means
    /// the mapping table was altered outside the pipeline and needs manual
    /// reconciliation.
    #[error(
        "mapping conflict for {kind} key '{external_key}': internal key {existing} vs {observed}"
    )]
    MappingConflict {
        kind: EntityKind,
        external_key: String,
        existing: i64,
        observed: i64,
    },

    /// Two external keys share one internal key.
    #[error("internal {kind} key {internal_key} is shared by '{first}' and '{second}'")]
    DuplicateInternalKey {
        kind: EntityKind,
        internal_key: i64,
        first: String,
        second: String,
    },

    /// Store rejected a key operation.
    #[error("key store operation {operation} failed for {kind}: {source}")]
    Store {
        operation: &'static str,
        kind: EntityKind,
        #[source]
        source: StoreError,
    },

    /// Vocabulary file could not be read.
    #[error("failed to read vocabulary {path}: {source}")]
    VocabularyRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Vocabulary file lacks a required column.
    #[error("vocabulary {path} has no '{column}' column")]
    VocabularyColumn { path: PathBuf, column: &'static str },
}

impl MapError {
    pub(crate) fn store(operation: &'static str, kind: EntityKind, source: StoreError) -> Self {
        Self::Store {
            operation,
            kind,
            source,
        }
    }

    /// Whether this error signals corrupted mapping state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::MappingConflict { .. } | Self::DuplicateInternalKey { .. }
        )
    }
}

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, MapError>;
