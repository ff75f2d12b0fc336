//! Upload session types and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::failure::FailureReason;

/// Unguessable identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the user owning an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-declared description of the file being uploaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    /// Original filename
    pub name: String,
    /// Total file size in bytes
    pub size: u64,
    /// Declared MIME type
    pub mime_type: String,
    /// Hex-encoded SHA-256 of the complete file
    pub sha256: String,
}

/// Upload session status.
///
/// Status only ever advances: `pending -> processing -> {complete, failed}`, with the
/// additional edge `pending -> failed` for sessions reclaimed before finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum UploadStatus {
    Pending = 0,
    Processing = 1,
    Complete = 2,
    Failed = 3,
}

impl UploadStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Processing),
            2 => Some(Self::Complete),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Complete)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a file is split into chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    /// Number of chunks (ceil(total_size / chunk_size))
    pub count: u32,
    /// Size of every chunk except possibly the last
    pub chunk_size: u64,
    /// Declared total file size
    pub total_size: u64,
}

impl ChunkPlan {
    /// Build the plan for a file. `chunk_size` must be non-zero.
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let count = total_size.div_ceil(chunk_size.max(1));
        Self {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            chunk_size,
            total_size,
        }
    }

    /// Exact byte length expected for `index`, or `None` if the index is out of range.
    ///
    /// Every chunk is `chunk_size` long except the last, which carries whatever remains.
    pub fn expected_len(&self, index: u32) -> Option<u64> {
        if index >= self.count {
            return None;
        }
        if index + 1 < self.count {
            Some(self.chunk_size)
        } else {
            Some(self.total_size - self.offset(index))
        }
    }

    /// Byte offset of `index` within the reassembled file.
    pub fn offset(&self, index: u32) -> u64 {
        u64::from(index) * self.chunk_size
    }
}

/// Receipt status of a single chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Received,
}

/// Record of a chunk that was written to the temporary artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub length: u64,
    /// Hex-encoded SHA-256 of the chunk bytes
    pub sha256: String,
    pub status: ChunkStatus,
}

/// Response to a successful `initiate_upload`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiatedUpload {
    pub upload_id: UploadId,
    pub chunk_plan: ChunkPlan,
}

/// Response to a successful `submit_chunk`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub chunks_received: u32,
    pub is_complete: bool,
}

/// Snapshot of a session as seen by `get_status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub bytes_received: u64,
    /// Storage key of the promoted artifact, once complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    /// SHA-256 of the stored bytes. Differs from the declared digest when metadata
    /// was stripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StatusReport {
    /// Upload progress percentage (0-100)
    pub fn progress_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (f64::from(self.chunks_received) / f64::from(self.total_chunks)) * 100.0
    }
}
