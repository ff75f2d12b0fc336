//! Positional writes into temporary upload artifacts.
//!
//! Each chunk lands at `index * chunk_size`, so chunks of one upload cover disjoint
//! byte ranges and may be written concurrently. Rewriting the same index with the same
//! bytes is harmless, which makes client retries idempotent.

use sift_core::UploadId;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

const ARTIFACT_SUFFIX: &str = "part";

#[derive(Debug, Clone)]
pub struct ChunkWriter {
    temp_dir: PathBuf,
}

impl ChunkWriter {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// `{temp_dir}/{upload_id}.part`
    pub fn artifact_path(&self, upload_id: UploadId) -> PathBuf {
        self.temp_dir
            .join(format!("{}.{}", upload_id, ARTIFACT_SUFFIX))
    }

    /// Create the empty temporary artifact for a new upload.
    ///
    /// Fails if the file already exists.
    pub async fn create(&self, upload_id: UploadId) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.temp_dir).await?;
        let path = self.artifact_path(upload_id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(path)
    }

    /// Write `bytes` at `offset`.
    ///
    /// The artifact must already exist; a reclaimed upload's writes fail with
    /// `NotFound` instead of recreating the file.
    pub async fn write_at(&self, path: &Path, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Current size of the artifact on disk
    pub async fn len(&self, path: &Path) -> std::io::Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    /// Delete an artifact. A missing file is not an error.
    pub async fn remove(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_out_of_order_writes_reassemble() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkWriter::new(dir.path());
        let path = writer.create(UploadId::new()).await.unwrap();

        writer.write_at(&path, 8, b"IJ").await.unwrap();
        writer.write_at(&path, 0, b"ABCD").await.unwrap();
        writer.write_at(&path, 4, b"EFGH").await.unwrap();
        // Retry of an already written chunk
        writer.write_at(&path, 4, b"EFGH").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"ABCDEFGHIJ");
        assert_eq!(writer.len(&path).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_create_refuses_existing_artifact() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkWriter::new(dir.path());
        let id = UploadId::new();
        writer.create(id).await.unwrap();
        assert!(writer.create(id).await.is_err());
    }

    #[tokio::test]
    async fn test_write_after_removal_is_not_found() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkWriter::new(dir.path());
        let path = writer.create(UploadId::new()).await.unwrap();

        writer.remove(&path).await.unwrap();
        writer.remove(&path).await.unwrap();

        let err = writer.write_at(&path, 0, b"x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!path.exists());
    }
}
