#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sift_core::{
    FileInfo, IngestConfig, InitiatedUpload, StatusReport, UploadId, UploadStatus, UserId,
};
use sift_db::InMemoryQuotaStore;
use sift_ingest::{integrity, Collaborators, IngestService};
use sift_processing::{MalwareScanner, MetadataStripper, ScanReport, StagedArtifact};
use sift_storage::{LocalStorage, Storage, StorageError, StorageResult};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const CHUNK_SIZE: u64 = 1024;

#[derive(Clone)]
pub enum ScanMode {
    Clean,
    Infected(Vec<String>),
    /// Never returns; only the deadline ends the scan
    Hang,
    Error(String),
    /// Waits for the notify before reporting clean
    Gate(Arc<Notify>),
}

/// Mock malware scanner
pub struct MockScanner {
    mode: ScanMode,
    calls: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

impl MockScanner {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_cancel(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MalwareScanner for MockScanner {
    async fn scan(&self, path: &Path, cancel: CancellationToken) -> anyhow::Result<ScanReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(path.exists(), "scanner called without an artifact");

        let flag = self.cancelled.clone();
        let watch = cancel.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        match &self.mode {
            ScanMode::Clean => Ok(ScanReport::clean()),
            ScanMode::Infected(threats) => Ok(ScanReport::infected(threats.clone())),
            ScanMode::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            ScanMode::Error(msg) => Err(anyhow::anyhow!("{}", msg)),
            ScanMode::Gate(notify) => {
                notify.notified().await;
                Ok(ScanReport::clean())
            }
        }
    }
}

#[derive(Clone, Copy)]
pub enum StripMode {
    Noop,
    /// Stages a copy keeping the first 8 bytes with garbage after them
    Corrupt,
    Fail,
    /// Stages a corrupt copy, then takes this long to return it
    Late(Duration),
}

/// Mock metadata stripper
pub struct MockStripper {
    mode: StripMode,
    calls: AtomicUsize,
}

impl MockStripper {
    pub fn new(mode: StripMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStripper for MockStripper {
    async fn strip_all(
        &self,
        path: &Path,
        _cancel: CancellationToken,
    ) -> anyhow::Result<Option<StagedArtifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StripMode::Noop => Ok(None),
            StripMode::Corrupt => Ok(Some(stage_corrupt_copy(path).await?)),
            StripMode::Fail => Err(anyhow::anyhow!("stripper crashed")),
            StripMode::Late(delay) => {
                let staged = stage_corrupt_copy(path).await?;
                tokio::time::sleep(delay).await;
                Ok(Some(staged))
            }
        }
    }
}

async fn stage_corrupt_copy(path: &Path) -> anyhow::Result<StagedArtifact> {
    let original = tokio::fs::read(path).await?;
    let mut corrupted = original[..8.min(original.len())].to_vec();
    corrupted.extend_from_slice(b"not an image body");

    let parent = path.parent().ok_or_else(|| anyhow::anyhow!("no parent"))?;
    let staged = tempfile::NamedTempFile::new_in(parent)?.into_temp_path();
    tokio::fs::write(&staged, corrupted).await?;
    Ok(StagedArtifact::new(staged))
}

/// Storage whose promote always fails; quarantine goes to real local storage
pub struct FailingStorage {
    inner: LocalStorage,
}

#[async_trait]
impl Storage for FailingStorage {
    async fn promote(
        &self,
        _artifact: &Path,
        _upload_id: UploadId,
        _extension: &str,
        _date: NaiveDate,
    ) -> StorageResult<String> {
        Err(StorageError::MoveFailed("disk full".to_string()))
    }

    async fn quarantine(
        &self,
        artifact: &Path,
        upload_id: UploadId,
        extension: &str,
    ) -> StorageResult<PathBuf> {
        self.inner.quarantine(artifact, upload_id, extension).await
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.inner.exists(storage_key).await
    }

    fn resolve(&self, storage_key: &str) -> StorageResult<PathBuf> {
        self.inner.resolve(storage_key)
    }
}

pub struct TestApp {
    pub service: Arc<IngestService>,
    pub scanner: Arc<MockScanner>,
    pub stripper: Arc<MockStripper>,
    pub quota_store: Arc<InMemoryQuotaStore>,
    pub storage: Arc<LocalStorage>,
    pub config: IngestConfig,
    _root: TempDir,
}

pub struct TestAppBuilder {
    config: IngestConfig,
    scan: ScanMode,
    strip: StripMode,
    real_stripper: bool,
    failing_storage: bool,
    root: TempDir,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        let root = TempDir::new().unwrap();
        let config = IngestConfig::default()
            .with_root_dir(root.path())
            .with_chunk_size(CHUNK_SIZE)
            .with_rate_limit(1000, Duration::from_secs(60))
            .with_scan_timeout(Duration::from_secs(5));

        TestAppBuilder {
            config,
            scan: ScanMode::Clean,
            strip: StripMode::Noop,
            real_stripper: false,
            failing_storage: false,
            root,
        }
    }

    pub async fn spawn() -> TestApp {
        Self::builder().build().await
    }

    pub fn temp_files(&self) -> Vec<PathBuf> {
        list_files(&self.config.temp_dir)
    }

    pub fn quarantine_files(&self) -> Vec<PathBuf> {
        list_files(&self.config.quarantine_dir)
    }

    /// Path of the stored artifact for a completed upload
    pub fn stored_path(&self, report: &StatusReport) -> PathBuf {
        let key = report.storage_key.as_deref().expect("no storage key");
        self.storage.resolve(key).unwrap()
    }

    pub async fn temp_path(&self, upload_id: UploadId) -> PathBuf {
        self.service
            .registry()
            .get(upload_id)
            .await
            .expect("session not registered")
            .temp_path
            .clone()
    }
}

impl TestAppBuilder {
    pub fn config(mut self, f: impl FnOnce(IngestConfig) -> IngestConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn scanner(mut self, mode: ScanMode) -> Self {
        self.scan = mode;
        self
    }

    pub fn stripper(mut self, mode: StripMode) -> Self {
        self.strip = mode;
        self
    }

    pub fn exif_stripper(mut self) -> Self {
        self.real_stripper = true;
        self
    }

    pub fn failing_storage(mut self) -> Self {
        self.failing_storage = true;
        self
    }

    pub async fn build(self) -> TestApp {
        let scanner = Arc::new(MockScanner::new(self.scan));
        let stripper = Arc::new(MockStripper::new(self.strip));
        let quota_store = Arc::new(InMemoryQuotaStore::new());
        let local = Arc::new(
            LocalStorage::new(&self.config.storage_dir, &self.config.quarantine_dir)
                .await
                .unwrap(),
        );

        let storage: Arc<dyn Storage> = if self.failing_storage {
            Arc::new(FailingStorage {
                inner: (*local).clone(),
            })
        } else {
            local.clone()
        };
        let metadata: Arc<dyn MetadataStripper> = if self.real_stripper {
            Arc::new(sift_processing::ExifStripper::new())
        } else {
            stripper.clone()
        };

        let service = IngestService::new(
            self.config.clone(),
            Collaborators {
                scanner: scanner.clone(),
                stripper: metadata,
                quota_store: quota_store.clone(),
                storage,
            },
        )
        .await
        .unwrap();

        TestApp {
            service: Arc::new(service),
            scanner,
            stripper,
            quota_store,
            storage: local,
            config: self.config,
            _root: self.root,
        }
    }
}

pub fn user() -> UserId {
    UserId::new(Uuid::new_v4())
}

pub fn file_info(name: &str, mime: &str, bytes: &[u8]) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        size: bytes.len() as u64,
        mime_type: mime.to_string(),
        sha256: integrity::sha256_hex(bytes),
    }
}

/// A valid PNG padded with trailing zeros to `len` bytes
pub fn png_bytes(len: usize) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    let mut bytes = out.into_inner();
    assert!(bytes.len() <= len, "PNG fixture needs at least {} bytes", bytes.len());
    bytes.resize(len, 0);
    bytes
}

/// A minimal PDF of exactly `len` bytes
pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let head = b"%PDF-1.4\n";
    let tail = b"\n%%EOF\n";
    assert!(len >= head.len() + tail.len());
    let mut bytes = head.to_vec();
    bytes.resize(len - tail.len(), b'%');
    bytes.extend_from_slice(tail);
    bytes
}

/// A JPEG carrying an EXIF segment
pub fn jpeg_with_exif() -> Vec<u8> {
    use img_parts::jpeg::Jpeg;
    use img_parts::ImageEXIF;

    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([10, 120, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();

    let mut jpeg = Jpeg::from_bytes(bytes::Bytes::from(out.into_inner())).unwrap();
    jpeg.set_exif(Some(bytes::Bytes::from_static(
        b"MM\x00\x2a\x00\x00\x00\x08\x00\x00",
    )));
    jpeg.encoder().bytes().to_vec()
}

pub fn has_exif(bytes: &[u8]) -> bool {
    use img_parts::jpeg::Jpeg;
    use img_parts::ImageEXIF;

    Jpeg::from_bytes(bytes::Bytes::copy_from_slice(bytes))
        .unwrap()
        .exif()
        .is_some()
}

/// Initiate an upload and submit every chunk in order
pub async fn upload_all(
    service: &IngestService,
    user_id: UserId,
    info: FileInfo,
    bytes: &[u8],
) -> InitiatedUpload {
    let initiated = service.initiate_upload(user_id, info).await.unwrap();
    let chunk_size = initiated.chunk_plan.chunk_size as usize;

    for (index, chunk) in bytes.chunks(chunk_size).enumerate() {
        service
            .submit_chunk(initiated.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }
    initiated
}

/// Poll until the upload reaches a terminal status
pub async fn wait_for_terminal(service: &IngestService, upload_id: UploadId) -> StatusReport {
    for _ in 0..1000 {
        let report = service.get_status(upload_id).await.unwrap();
        if report.status.is_terminal() {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {} never reached a terminal status", upload_id);
}

pub async fn wait_for_status(service: &IngestService, upload_id: UploadId, status: UploadStatus) {
    for _ in 0..1000 {
        if service.get_status(upload_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {} never reached {}", upload_id, status);
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
