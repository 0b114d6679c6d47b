use thiserror::Error;

/// Unified error type for dayzero operations
#[derive(Debug, Error)]
pub enum DayzeroError {
    /// A remote call failed because of connectivity. Operations hitting this
    /// are re-queued and retried on the next reconnect; callers must not
    /// treat it as fatal.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// A durable-storage write failed because the backing store is full.
    /// Triggers cache eviction and one retry before degrading to
    /// in-memory-only operation.
    #[error("storage quota exceeded while writing '{0}'")]
    QuotaExceeded(String),

    /// A remote document was absent where one was expected.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The remote store rejected the call. Never retried automatically:
    /// retrying cannot fix an authorization problem and would mask it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A persisted blob or document snapshot failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable-storage failure other than quota exhaustion.
    #[error("storage error: {0}")]
    Storage(String),
}

impl DayzeroError {
    /// Whether this failure is expected to clear on its own (connectivity),
    /// as opposed to one that needs intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, DayzeroError::TransientNetwork(_))
    }
}

/// Result type alias for dayzero operations
pub type Result<T> = std::result::Result<T, DayzeroError>;
