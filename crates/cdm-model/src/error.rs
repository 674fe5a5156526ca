use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("record has {actual} fields but header has {expected}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
    #[error("unknown source entity: {0}")]
    UnknownSourceEntity(String),
    #[error("invalid store backend '{0}' (expected 'memory' or 'sqlite:<path>')")]
    InvalidStoreBackend(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
