//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid store location: {0}")]
    InvalidLocation(String),

    #[error("Corrupt task record {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}
