//! Sift Core Library
//!
//! This crate provides the domain types, error taxonomy, allowed-type table and
//! configuration shared by every sift component.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod types;

// Re-export commonly used types
pub use config::IngestConfig;
pub use error::{IngestError, LogLevel};
pub use hooks::QuotaStore;
pub use models::{
    ChunkPlan, ChunkReceipt, ChunkRecord, ChunkStatus, FailureReason, FileInfo, InitiatedUpload,
    PipelineStep, StatusReport, UploadId, UploadStatus, UserId,
};
pub use types::{AllowedType, Signature, SIGNATURE_TABLE};
