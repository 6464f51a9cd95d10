use thiserror::Error;

/// Errors shared by the query cache and the request batcher.
///
/// Every variant carries owned data only, so a single failure can be cloned
/// and delivered unchanged to every caller waiting on the same batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Batch size mismatch: expected {expected} results, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("Batch cancelled: {0}")]
    BatchCancelled(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl QueryError {
    /// Create an execution error from anything displayable
    pub fn execution(msg: impl std::fmt::Display) -> Self {
        QueryError::ExecutionError(msg.to_string())
    }

    /// Create a storage error from anything displayable
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        QueryError::StorageError(msg.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
