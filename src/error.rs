use thiserror::Error;

/// Errors surfaced by classification and live capture.
///
/// An empty source is not an error: it resolves to `Label::Unknown`.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("failed to stage payload: {0}")]
    Staging(#[from] std::io::Error),

    #[error("device busy: {0} already has an active live session")]
    DeviceBusy(String),

    #[error("live worker for {0} panicked")]
    WorkerPanicked(String),
}

impl ClassifyError {
    pub(crate) fn source_unavailable(err: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable(err.to_string())
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Self::ModelInvocation(err.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, ClassifyError>;
