//! Error types module
//!
//! `IngestError` is what the synchronous operations (`initiate_upload`, `submit_chunk`,
//! `get_status`) return to their caller. Failures of the finalize pipeline never surface
//! here: they are recorded on the session as a [`FailureReason`](crate::FailureReason).

use std::io;
use std::time::Duration;

use crate::models::UploadId;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like resource limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Rate limit exceeded, retry in {} ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Quota exceeded: {used} bytes used, {requested} requested, limit {limit}")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("Invalid file info: {0}")]
    InvalidFileInfo(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Too many concurrent uploads (limit: {limit})")]
    TooManyUploads { limit: usize },

    #[error("Upload not found: {0}")]
    UploadNotFound(UploadId),

    #[error("Quota store error")]
    QuotaStore(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// Machine-readable error code (e.g., "RATE_LIMITED")
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::InvalidFileInfo(_) => "INVALID_FILE_INFO",
            Self::InvalidChunk(_) => "INVALID_CHUNK",
            Self::TooManyUploads { .. } => "TOO_MANY_UPLOADS",
            Self::UploadNotFound(_) => "UPLOAD_NOT_FOUND",
            Self::QuotaStore(_) => "QUOTA_STORE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Validation-class errors are caused by the request itself and never leave
    /// partial session state behind.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::QuotaExceeded { .. }
                | Self::InvalidFileInfo(_)
                | Self::InvalidChunk(_)
                | Self::TooManyUploads { .. }
                | Self::UploadNotFound(_)
        )
    }

    /// Log level for this error
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::InvalidFileInfo(_) | Self::InvalidChunk(_) | Self::UploadNotFound(_) => {
                LogLevel::Debug
            }
            Self::RateLimited { .. } | Self::QuotaExceeded { .. } | Self::TooManyUploads { .. } => {
                LogLevel::Warn
            }
            Self::QuotaStore(_) | Self::Io(_) => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(IngestError::InvalidChunk("bad".into()).is_validation());
        assert!(IngestError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_validation());
        assert!(!IngestError::QuotaStore(anyhow::anyhow!("down")).is_validation());
        assert!(!IngestError::Io(io::Error::other("disk")).is_validation());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(
            IngestError::InvalidFileInfo("x".into()).log_level(),
            LogLevel::Debug
        );
        assert_eq!(
            IngestError::QuotaExceeded {
                used: 1,
                requested: 2,
                limit: 2
            }
            .log_level(),
            LogLevel::Warn
        );
        assert_eq!(
            IngestError::QuotaStore(anyhow::anyhow!("db down")).log_level(),
            LogLevel::Error
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            IngestError::UploadNotFound(UploadId::new()).error_code(),
            "UPLOAD_NOT_FOUND"
        );
        assert_eq!(
            IngestError::TooManyUploads { limit: 3 }.error_code(),
            "TOO_MANY_UPLOADS"
        );
    }
}
