//! Ingestion service facade.

use sift_core::{
    ChunkPlan, ChunkReceipt, ChunkRecord, ChunkStatus, FileInfo, IngestConfig, IngestError,
    InitiatedUpload, LogLevel, QuotaStore, StatusReport, UploadId, UploadStatus, UserId,
};
use sift_infra::FixedWindowRateLimiter;
use sift_processing::{FileInfoValidator, MalwareScanner, MetadataStripper};
use sift_storage::Storage;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chunk_writer::ChunkWriter;
use crate::integrity;
use crate::pipeline::FinalizePipeline;
use crate::quota::QuotaManager;
use crate::registry::{SessionEntry, UploadRegistry};
use crate::sweeper::Sweeper;

/// External collaborators the service depends on
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn MalwareScanner>,
    pub stripper: Arc<dyn MetadataStripper>,
    pub quota_store: Arc<dyn QuotaStore>,
    pub storage: Arc<dyn Storage>,
}

/// Chunked upload ingestion.
///
/// Owns the session registry, rate limiter and quota reservations. Finalize pipelines
/// run as tracked background tasks; [`IngestService::shutdown`] waits for them.
pub struct IngestService {
    config: Arc<IngestConfig>,
    registry: Arc<UploadRegistry>,
    rate_limiter: Arc<FixedWindowRateLimiter>,
    quota: Arc<QuotaManager>,
    validator: FileInfoValidator,
    chunk_writer: Arc<ChunkWriter>,
    pipeline: Arc<FinalizePipeline>,
    sweeper: Arc<Sweeper>,
    tasks: TaskTracker,
}

impl IngestService {
    pub async fn new(config: IngestConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.temp_dir).await?;

        let config = Arc::new(config);
        let registry = Arc::new(UploadRegistry::new(config.max_concurrent_uploads));
        let rate_limiter = Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
        ));
        let quota = Arc::new(QuotaManager::new(
            collaborators.quota_store,
            config.quota_per_user,
        ));
        let chunk_writer = Arc::new(ChunkWriter::new(config.temp_dir.clone()));

        let pipeline = Arc::new(FinalizePipeline::new(
            config.clone(),
            collaborators.scanner,
            collaborators.stripper,
            collaborators.storage,
            quota.clone(),
            chunk_writer.clone(),
        ));

        let sweeper = Arc::new(Sweeper::new(
            registry.clone(),
            quota.clone(),
            rate_limiter.clone(),
            chunk_writer.clone(),
            config.staleness_deadline,
            config.sweep_interval,
        ));

        tracing::info!(
            temp_dir = %config.temp_dir.display(),
            chunk_size = config.chunk_size,
            max_file_size = config.max_file_size,
            max_concurrent_uploads = config.max_concurrent_uploads,
            "Ingest service initialised"
        );

        Ok(Self {
            validator: FileInfoValidator::from_config(&config),
            config,
            registry,
            rate_limiter,
            quota,
            chunk_writer,
            pipeline,
            sweeper,
            tasks: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Open an upload session.
    ///
    /// Checks, in order: rate limit, projected quota, declared file info, concurrent
    /// upload capacity. Nothing is kept when any of them fails.
    #[tracing::instrument(skip(self, file_info), fields(user_id = %user_id, file.size = file_info.size))]
    pub async fn initiate_upload(
        &self,
        user_id: UserId,
        file_info: FileInfo,
    ) -> Result<InitiatedUpload, IngestError> {
        let result = self.try_initiate(user_id, file_info).await;
        if let Err(e) = &result {
            log_rejection("initiate_upload", e);
        }
        result
    }

    async fn try_initiate(
        &self,
        user_id: UserId,
        file_info: FileInfo,
    ) -> Result<InitiatedUpload, IngestError> {
        if let Err(retry_after) = self.rate_limiter.check(user_id).await {
            return Err(IngestError::RateLimited { retry_after });
        }

        let size = file_info.size;
        self.quota.reserve(user_id, size).await?;

        match self.open_session(user_id, file_info).await {
            Ok(initiated) => Ok(initiated),
            Err(e) => {
                self.quota.release(user_id, size).await;
                Err(e)
            }
        }
    }

    async fn open_session(
        &self,
        user_id: UserId,
        mut file_info: FileInfo,
    ) -> Result<InitiatedUpload, IngestError> {
        let allowed_type = *self
            .validator
            .validate(&file_info)
            .map_err(|e| IngestError::InvalidFileInfo(e.to_string()))?;
        file_info.mime_type = allowed_type.mime.to_string();

        if self.registry.active_count().await >= self.registry.max_active() {
            return Err(IngestError::TooManyUploads {
                limit: self.registry.max_active(),
            });
        }

        let chunk_plan = ChunkPlan::new(file_info.size, self.config.chunk_size);
        let upload_id = UploadId::new();
        let temp_path = self.chunk_writer.create(upload_id).await?;

        let entry = SessionEntry::new(
            upload_id,
            user_id,
            file_info,
            allowed_type,
            chunk_plan,
            temp_path.clone(),
        );

        if let Err(e) = self.registry.insert(entry).await {
            if let Err(rm) = self.chunk_writer.remove(&temp_path).await {
                tracing::warn!(error = %rm, "Failed to remove temporary artifact");
            }
            return Err(e);
        }

        tracing::info!(
            upload_id = %upload_id,
            chunks = chunk_plan.count,
            chunk_size = chunk_plan.chunk_size,
            "Upload initiated"
        );

        Ok(InitiatedUpload {
            upload_id,
            chunk_plan,
        })
    }

    /// Accept chunk `index` of an upload.
    ///
    /// The chunk must be exactly the planned length for its index. Resubmitting an
    /// index overwrites it. The submission that completes the upload starts the
    /// finalize pipeline.
    #[tracing::instrument(skip(self, bytes), fields(upload_id = %upload_id, chunk.index = index, chunk.len = bytes.len()))]
    pub async fn submit_chunk(
        &self,
        upload_id: UploadId,
        index: u32,
        bytes: &[u8],
    ) -> Result<ChunkReceipt, IngestError> {
        let result = self.try_submit(upload_id, index, bytes).await;
        if let Err(e) = &result {
            log_rejection("submit_chunk", e);
        }
        result
    }

    async fn try_submit(
        &self,
        upload_id: UploadId,
        index: u32,
        bytes: &[u8],
    ) -> Result<ChunkReceipt, IngestError> {
        let session = self
            .registry
            .get(upload_id)
            .await
            .ok_or(IngestError::UploadNotFound(upload_id))?;

        let received = {
            let _gate = session.write_shared().await;

            let status = session.status();
            if status != UploadStatus::Pending {
                return Err(IngestError::InvalidChunk(format!(
                    "upload is {}, not accepting chunks",
                    status
                )));
            }

            let plan = session.chunk_plan;
            let expected = plan.expected_len(index).ok_or_else(|| {
                IngestError::InvalidChunk(format!(
                    "index {} out of range (upload has {} chunks)",
                    index, plan.count
                ))
            })?;

            if bytes.len() as u64 != expected {
                return Err(IngestError::InvalidChunk(format!(
                    "chunk {} must be {} bytes, got {}",
                    index,
                    expected,
                    bytes.len()
                )));
            }

            self.chunk_writer
                .write_at(&session.temp_path, plan.offset(index), bytes)
                .await
                .map_err(|e| match e.kind() {
                    ErrorKind::NotFound => IngestError::InvalidChunk(
                        "temporary artifact no longer exists".to_string(),
                    ),
                    _ => IngestError::Io(e),
                })?;

            let record = ChunkRecord {
                length: expected,
                sha256: integrity::sha256_hex(bytes),
                status: ChunkStatus::Received,
            };
            session.record_chunk(index, record).await
        };

        let is_complete = received == session.chunk_plan.count;
        if is_complete {
            self.trigger_finalize(&session);
        }

        Ok(ChunkReceipt {
            chunks_received: received,
            is_complete,
        })
    }

    /// Start the finalize pipeline for an upload that is still pending.
    ///
    /// Returns `false` when the upload already left `pending`, in which case nothing
    /// happens. An upload finalized before all chunks arrived fails as incomplete.
    pub async fn finalize(&self, upload_id: UploadId) -> Result<bool, IngestError> {
        let session = self
            .registry
            .get(upload_id)
            .await
            .ok_or(IngestError::UploadNotFound(upload_id))?;
        Ok(self.trigger_finalize(&session))
    }

    fn trigger_finalize(&self, session: &Arc<SessionEntry>) -> bool {
        if !session.try_transition(UploadStatus::Pending, UploadStatus::Processing) {
            tracing::debug!(
                upload_id = %session.upload_id,
                status = %session.status(),
                "Finalize already triggered"
            );
            return false;
        }

        tracing::info!(upload_id = %session.upload_id, "Finalize triggered");
        let pipeline = self.pipeline.clone();
        let session = session.clone();
        self.tasks.spawn(async move { pipeline.run(session).await });
        true
    }

    pub async fn get_status(&self, upload_id: UploadId) -> Result<StatusReport, IngestError> {
        match self.registry.get(upload_id).await {
            Some(session) => Ok(session.report().await),
            None => {
                let e = IngestError::UploadNotFound(upload_id);
                log_rejection("get_status", &e);
                Err(e)
            }
        }
    }

    pub fn sweeper(&self) -> Arc<Sweeper> {
        self.sweeper.clone()
    }

    /// Start periodic sweeping until `shutdown` is cancelled.
    pub fn start_sweeper(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.sweeper.clone().start(shutdown)
    }

    pub fn registry(&self) -> &Arc<UploadRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    /// Stop accepting pipeline work and wait for running pipelines to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        tracing::info!(in_flight = self.tasks.len(), "Waiting for finalize pipelines");
        self.tasks.wait().await;
    }
}

fn log_rejection(operation: &'static str, error: &IngestError) {
    match error.log_level() {
        LogLevel::Debug => tracing::debug!(
            operation = operation,
            code = error.error_code(),
            error = %error,
            "Request rejected"
        ),
        LogLevel::Warn => tracing::warn!(
            operation = operation,
            code = error.error_code(),
            error = %error,
            "Request rejected"
        ),
        LogLevel::Error => tracing::error!(
            operation = operation,
            code = error.error_code(),
            error = ?error,
            "Request failed"
        ),
    }
}
