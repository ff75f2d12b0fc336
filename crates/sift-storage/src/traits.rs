//! Storage abstraction trait
//!
//! This module defines the Storage trait the finalize pipeline places artifacts through.

use async_trait::async_trait;
use chrono::NaiveDate;
use sift_core::UploadId;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Move failed: {0}")]
    MoveFailed(String),

    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Placement of finished artifacts.
///
/// Both moves consume the artifact at `artifact`: on success it exists only at the
/// destination, on failure only at its original path.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Move a verified artifact into dated long-term storage and return its storage key.
    async fn promote(
        &self,
        artifact: &Path,
        upload_id: UploadId,
        extension: &str,
        date: NaiveDate,
    ) -> StorageResult<String>;

    /// Move an infected artifact into quarantine and return its new path.
    async fn quarantine(
        &self,
        artifact: &Path,
        upload_id: UploadId,
        extension: &str,
    ) -> StorageResult<PathBuf>;

    /// Check whether a storage key refers to an existing artifact
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Filesystem path of a storage key
    fn resolve(&self, storage_key: &str) -> StorageResult<PathBuf>;
}
