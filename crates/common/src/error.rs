use thiserror::Error;

/// Top-level error type for deep-research operations.
///
/// Variants correspond to the error kinds named in the error-handling design:
/// each one carries its own propagation rule (retry, log-and-continue, or
/// surface to the HTTP/SSE boundary) rather than a single generic failure.
#[derive(Debug, Error)]
pub enum DeepResearchError {
    /// Bad request body or a research request with no usable user query.
    #[error("input error: {0}")]
    InputError(String),

    /// LLM call returned empty/non-parsable content, or the transport failed.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// A single URL fetch failed; never fatal to the run.
    #[error("fetch error for {url}: {detail}")]
    FetchError { url: String, detail: String },

    /// A fetch was aborted by the scheduler's cancellation signal.
    #[error("fetch cancelled for {0}")]
    SchedulerCancelled(String),

    /// The store (database) was unreachable or a query failed.
    #[error("store error: {0}")]
    StoreError(String),

    /// A session (or a rollback target iteration) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A session's recomputed integrity hash does not match the stored one.
    #[error("integrity hash mismatch for session {0}")]
    IntegrityMismatch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl DeepResearchError {
    /// Whether this error should ever propagate to the HTTP/SSE boundary
    /// as the cause of a request or stream failing outright, rather than
    /// being absorbed and logged by the orchestrator.
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            Self::InputError(_) | Self::NotFound(_) | Self::IntegrityMismatch(_)
        )
    }

    /// Whether this error is recoverable in-run (logged, run continues
    /// with a degraded result) rather than aborting the session.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::ProviderError(_) | Self::FetchError { .. } | Self::SchedulerCancelled(_)
        )
    }
}

/// Result type alias for deep-research operations.
pub type Result<T> = std::result::Result<T, DeepResearchError>;
