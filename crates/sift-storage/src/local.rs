use crate::keys;
use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use sift_core::UploadId;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    storage_dir: PathBuf,
    quarantine_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `storage_dir` - Root of long-term storage (e.g., "/var/lib/sift/storage")
    /// * `quarantine_dir` - Directory receiving infected artifacts
    pub async fn new(
        storage_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let storage_dir = storage_dir.into();
        let quarantine_dir = quarantine_dir.into();

        for dir in [&storage_dir, &quarantine_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage {
            storage_dir,
            quarantine_dir,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Keys are relative paths made only of normal components, so they can never
    /// resolve outside the storage directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() || storage_key.contains("..") || storage_key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let relative = Path::new(storage_key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        Ok(self.storage_dir.join(relative))
    }

    /// Rename `from` to `to` without ever overwriting an existing file.
    async fn move_into(&self, from: &Path, to: &Path) -> StorageResult<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::try_exists(to).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists(to.display().to_string()));
        }

        fs::rename(from, to).await.map_err(|e| {
            StorageError::MoveFailed(format!(
                "Failed to move {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    #[tracing::instrument(skip(self, artifact), fields(upload_id = %upload_id))]
    async fn promote(
        &self,
        artifact: &Path,
        upload_id: UploadId,
        extension: &str,
        date: NaiveDate,
    ) -> StorageResult<String> {
        let key = keys::dated_key(upload_id, extension, date)?;
        let path = self.key_to_path(&key)?;
        let start = std::time::Instant::now();

        self.move_into(artifact, &path).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Artifact promoted to storage"
        );

        Ok(key)
    }

    #[tracing::instrument(skip(self, artifact), fields(upload_id = %upload_id))]
    async fn quarantine(
        &self,
        artifact: &Path,
        upload_id: UploadId,
        extension: &str,
    ) -> StorageResult<PathBuf> {
        let path = self
            .quarantine_dir
            .join(keys::quarantine_file_name(upload_id, extension)?);

        self.move_into(artifact, &path).await?;

        tracing::warn!(path = %path.display(), "Artifact moved to quarantine");
        Ok(path)
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn resolve(&self, storage_key: &str) -> StorageResult<PathBuf> {
        self.key_to_path(storage_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, LocalStorage, PathBuf) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), dir.path().join("quarantine"))
            .await
            .unwrap();
        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).await.unwrap();
        (dir, storage, tmp)
    }

    #[tokio::test]
    async fn test_promote_moves_into_dated_path() {
        let (_dir, storage, tmp) = setup().await;
        let artifact = tmp.join("a.part");
        fs::write(&artifact, b"hello").await.unwrap();

        let id = UploadId::new();
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let key = storage.promote(&artifact, id, ".pdf", date).await.unwrap();

        assert_eq!(key, format!("2025/01/31/{}.pdf", id));
        assert!(!artifact.exists());
        assert!(storage.exists(&key).await.unwrap());
        let stored = storage.resolve(&key).unwrap();
        assert_eq!(fs::read(stored).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_quarantine_keeps_artifact() {
        let (_dir, storage, tmp) = setup().await;
        let artifact = tmp.join("b.part");
        fs::write(&artifact, b"evil").await.unwrap();

        let id = UploadId::new();
        let path = storage.quarantine(&artifact, id, ".jpg").await.unwrap();

        assert_eq!(path, storage.quarantine_dir().join(format!("{}.jpg", id)));
        assert!(path.exists());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_failed_move_leaves_source_in_place() {
        let (_dir, storage, tmp) = setup().await;
        let id = UploadId::new();
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();

        let missing = tmp.join("missing.part");
        let result = storage.promote(&missing, id, ".png", date).await;
        assert!(matches!(result, Err(StorageError::MoveFailed(_))));

        let key = format!("2025/01/31/{}.png", id);
        assert!(!storage.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_never_overwrites() {
        let (_dir, storage, tmp) = setup().await;
        let id = UploadId::new();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

        let first = tmp.join("first.part");
        fs::write(&first, b"one").await.unwrap();
        storage.promote(&first, id, ".png", date).await.unwrap();

        let second = tmp.join("second.part");
        fs::write(&second, b"two").await.unwrap();
        let result = storage.promote(&second, id, ".png", date).await;

        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_key_traversal_rejected() {
        let (_dir, storage, _tmp) = setup().await;
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("/etc/passwd").is_err());
        assert!(storage.resolve("./2025/x").is_err());
        assert!(storage.resolve("2025/01/01/x.png").is_ok());
    }
}
