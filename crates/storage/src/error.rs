//! Store error taxonomy.

use thiserror::Error;

/// Errors surfaced by the chunk stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Key absent locally (and, for network gets, after peer search).
    #[error("chunk not found")]
    NotFound,

    /// Stored bytes cannot be a chunk (too short to carry a size prefix).
    #[error("corrupt chunk data: {0}")]
    Corrupt(String),

    /// Durable substrate failure.
    #[error("storage io error: {0}")]
    Io(String),

    /// A peer request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The caller cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// The chunk cannot be stored as given (e.g. no data and no key).
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}

impl StoreError {
    /// Whether a retry against another candidate could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Io(_))
    }
}
