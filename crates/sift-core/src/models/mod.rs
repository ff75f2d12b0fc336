//! Domain models for chunked uploads.

pub mod failure;
pub mod upload;

pub use failure::{FailureReason, PipelineStep};
pub use upload::{
    ChunkPlan, ChunkReceipt, ChunkRecord, ChunkStatus, FileInfo, InitiatedUpload, StatusReport,
    UploadId, UploadStatus, UserId,
};
