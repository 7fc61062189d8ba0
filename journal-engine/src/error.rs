//! Error types for query execution

use thiserror::Error;

/// Errors that end a query without a result.
///
/// Per-file failures are not errors: they are recovered inside the query and
/// reported through the result's status and diagnostics.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request cannot be executed as given
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled the query
    #[error("Request cancelled")]
    Cancelled,

    /// The worker running the query panicked or was aborted
    #[error("Query worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

static_assertions::const_assert!(std::mem::size_of::<EngineError>() <= 64);

/// A specialized Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
