use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, ClipscribeError>;

/// Error taxonomy for the transcription pipeline.
///
/// Every failure observed at an adapter or storage boundary is classified
/// into exactly one of these kinds at that boundary and propagated as a
/// typed value from there on. Callers match on the variant (or use
/// [`ClipscribeError::kind`]) rather than inspecting message text.
#[derive(Error, Debug)]
pub enum ClipscribeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("required tool is not installed: {0}")]
    ExternalToolMissing(String),

    #[error("external tool failed: {0}")]
    ExternalToolFailed(String),

    #[error("video unavailable: {0}")]
    VideoUnavailable(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("rate limited by remote service: {0}")]
    RateLimited(String),

    #[error("insufficient system resources: {0}")]
    InsufficientResources(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("conflicting transcription exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl ClipscribeError {
    /// Stable machine-readable label for the error kind, used by the JSON
    /// and CLI presentation layers.
    pub fn kind(&self) -> &'static str {
        match self {
            ClipscribeError::InvalidArgument(_) => "invalid_argument",
            ClipscribeError::ExternalToolMissing(_) => "external_tool_missing",
            ClipscribeError::ExternalToolFailed(_) => "external_tool_failed",
            ClipscribeError::VideoUnavailable(_) => "video_unavailable",
            ClipscribeError::NetworkFailure(_) => "network_failure",
            ClipscribeError::RateLimited(_) => "rate_limited",
            ClipscribeError::InsufficientResources(_) => "insufficient_resources",
            ClipscribeError::Cancelled(_) => "cancelled",
            ClipscribeError::Conflict(_) => "conflict",
            ClipscribeError::NotFound(_) => "not_found",
            ClipscribeError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl From<sqlx::Error> for ClipscribeError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ClipscribeError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ClipscribeError::Conflict(err.to_string())
            }
            _ => ClipscribeError::StorageFailure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(
            ClipscribeError::VideoUnavailable("gone".into()).kind(),
            "video_unavailable"
        );
        assert_eq!(ClipscribeError::Cancelled("deadline".into()).kind(), "cancelled");
        assert_eq!(ClipscribeError::Conflict("dup".into()).kind(), "conflict");
    }
}
