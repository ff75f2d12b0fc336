//! Terminal failure reasons recorded by the finalize pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Step of the finalize pipeline, used to tag logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Combine,
    Integrity,
    MalwareScan,
    MetadataStrip,
    ContentType,
    StoragePlacement,
    QuotaCommit,
    Cleanup,
    Sweep,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Combine => "combine",
            Self::Integrity => "integrity",
            Self::MalwareScan => "malware_scan",
            Self::MetadataStrip => "metadata_strip",
            Self::ContentType => "content_type",
            Self::StoragePlacement => "storage_placement",
            Self::QuotaCommit => "quota_commit",
            Self::Cleanup => "cleanup",
            Self::Sweep => "sweep",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended in `failed`.
///
/// Closed set: every pipeline step maps its failures onto exactly one variant, so
/// handling is checked exhaustively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("Incomplete upload: {detail}")]
    IncompleteUpload { detail: String },

    #[error("Integrity mismatch: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Malware scan timed out after {timeout_ms} ms")]
    ScanTimeout { timeout_ms: u64 },

    #[error("Malware detected: {}", threats.join(", "))]
    MalwareDetected { threats: Vec<String> },

    #[error("Malware scan unavailable: {detail}")]
    ScanUnavailable { detail: String },

    #[error("Sanitization failure: {detail}")]
    SanitizationFailure { detail: String },

    #[error("Content type mismatch: declared {declared}, detected {}", detected.as_deref().unwrap_or("unknown"))]
    ContentTypeMismatch {
        declared: String,
        detected: Option<String>,
    },

    #[error("Storage failure: {detail}")]
    StorageFailure { detail: String },

    #[error("Upload expired before completion")]
    Expired,
}

impl FailureReason {
    /// Machine-readable failure code
    pub fn code(&self) -> &'static str {
        match self {
            Self::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            Self::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            Self::ScanTimeout { .. } => "SCAN_TIMEOUT",
            Self::MalwareDetected { .. } => "MALWARE_DETECTED",
            Self::ScanUnavailable { .. } => "SCAN_UNAVAILABLE",
            Self::SanitizationFailure { .. } => "SANITIZATION_FAILURE",
            Self::ContentTypeMismatch { .. } => "CONTENT_TYPE_MISMATCH",
            Self::StorageFailure { .. } => "STORAGE_FAILURE",
            Self::Expired => "EXPIRED",
        }
    }

    /// Step that produced this failure.
    pub fn step(&self) -> PipelineStep {
        match self {
            Self::IncompleteUpload { .. } => PipelineStep::Combine,
            Self::IntegrityMismatch { .. } => PipelineStep::Integrity,
            Self::ScanTimeout { .. }
            | Self::MalwareDetected { .. }
            | Self::ScanUnavailable { .. } => PipelineStep::MalwareScan,
            Self::SanitizationFailure { .. } => PipelineStep::MetadataStrip,
            Self::ContentTypeMismatch { .. } => PipelineStep::ContentType,
            Self::StorageFailure { .. } => PipelineStep::StoragePlacement,
            Self::Expired => PipelineStep::Sweep,
        }
    }

    /// Artifacts of these failures are forensic evidence and are kept in quarantine.
    pub fn retains_artifact(&self) -> bool {
        matches!(self, Self::MalwareDetected { .. })
    }

    /// Security-relevant failures are logged at error level.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::MalwareDetected { .. } | Self::ContentTypeMismatch { .. }
        )
    }
}
