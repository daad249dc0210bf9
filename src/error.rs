//! Mimir error types

/// Mimir error types
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum MimirError {
    // Request errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication denied")]
    AuthDenied,

    /// A guardrail screen rejected the request or the response.
    ///
    /// Terminal for that request; the engine never retries a blocked
    /// generation. `patterns` lists the matched rule sources, `asvs` the
    /// OWASP ASVS requirement tags the screen maps to.
    #[error("blocked by guardrail: {threat}")]
    GuardrailBlocked {
        threat: String,
        patterns: Vec<String>,
        asvs: Vec<String>,
    },

    // Scheduling errors
    #[error("request timed out after {seconds}s in the batch queue")]
    QueueTimeout { seconds: u64 },

    #[error("batch scheduler is shut down")]
    SchedulerClosed,

    // Inference errors
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    // Streaming errors
    #[error("stream error: {0}")]
    Stream(String),

    // Persistence errors
    #[error("snapshot I/O failed: {0}")]
    SnapshotIo(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation not implemented: {0}")]
    NotImplemented(String),

    #[error("unsupported mode: {0}")]
    Unsupported(String),
}

impl MimirError {
    /// Whether the engine recovers from this error locally instead of
    /// surfacing it to the caller.
    ///
    /// Embedding failures soft-degrade to a cache miss (and retrieval
    /// drops the chunk); snapshot failures are logged and state stays
    /// truth-in-RAM. Everything else propagates with its original
    /// message preserved.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EmbeddingFailed(_) | Self::SnapshotIo(_))
    }

    /// Whether this error is a guardrail block.
    ///
    /// Used by the serving boundary to map to a 403 with a structured
    /// reason rather than a generic internal error.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::GuardrailBlocked { .. })
    }
}

impl From<serde_json::Error> for MimirError {
    fn from(err: serde_json::Error) -> Self {
        MimirError::Json(err.to_string())
    }
}

impl From<std::io::Error> for MimirError {
    fn from(err: std::io::Error) -> Self {
        MimirError::SnapshotIo(err.to_string())
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
