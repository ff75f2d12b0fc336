//! Upload session registry.
//!
//! Sessions are owned by a single [`UploadRegistry`]. Each [`SessionEntry`] keeps its
//! status in an atomic so that every lifecycle transition is a compare-and-set: the
//! status only moves forward, and exactly one caller wins each edge.

use chrono::{DateTime, Utc};
use sift_core::{
    AllowedType, ChunkPlan, ChunkRecord, FailureReason, FileInfo, IngestError, StatusReport,
    UploadId, UploadStatus, UserId,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Outcome {
    failure: Option<FailureReason>,
    storage_key: Option<String>,
    stored_sha256: Option<String>,
    finished_at: Option<Instant>,
}

/// One in-flight or recently finished upload.
#[derive(Debug)]
pub struct SessionEntry {
    pub upload_id: UploadId,
    pub user_id: UserId,
    pub file_info: FileInfo,
    pub allowed_type: AllowedType,
    pub chunk_plan: ChunkPlan,
    /// Temporary artifact the chunks are written into
    pub temp_path: PathBuf,
    pub created_at: DateTime<Utc>,
    started: Instant,
    status: AtomicU8,
    chunks: Mutex<HashMap<u32, ChunkRecord>>,
    outcome: Mutex<Outcome>,
    /// Chunk writes hold this shared; the pipeline and the sweeper take it exclusively
    /// so they never observe a half-written artifact.
    write_gate: RwLock<()>,
}

impl SessionEntry {
    pub fn new(
        upload_id: UploadId,
        user_id: UserId,
        file_info: FileInfo,
        allowed_type: AllowedType,
        chunk_plan: ChunkPlan,
        temp_path: PathBuf,
    ) -> Self {
        Self {
            upload_id,
            user_id,
            file_info,
            allowed_type,
            chunk_plan,
            temp_path,
            created_at: Utc::now(),
            started: Instant::now(),
            status: AtomicU8::new(UploadStatus::Pending.as_u8()),
            chunks: Mutex::new(HashMap::new()),
            outcome: Mutex::new(Outcome::default()),
            write_gate: RwLock::new(()),
        }
    }

    pub fn status(&self) -> UploadStatus {
        // Only ever stored from an UploadStatus
        UploadStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(UploadStatus::Failed)
    }

    /// Compare-and-set the status along a forward edge of the state machine.
    ///
    /// Returns `true` only for the single caller that performed the transition.
    pub fn try_transition(&self, from: UploadStatus, to: UploadStatus) -> bool {
        if !from.can_advance_to(to) {
            return false;
        }
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `failed` from `from`, recording why.
    pub async fn mark_failed(&self, from: UploadStatus, reason: FailureReason) -> bool {
        let mut outcome = self.outcome.lock().await;
        if !self.try_transition(from, UploadStatus::Failed) {
            return false;
        }
        outcome.failure = Some(reason);
        outcome.finished_at = Some(Instant::now());
        true
    }

    /// Move from `processing` to `complete`, recording where the artifact went and
    /// the digest of the bytes stored there.
    pub async fn mark_complete(&self, storage_key: String, stored_sha256: String) -> bool {
        let mut outcome = self.outcome.lock().await;
        if !self.try_transition(UploadStatus::Processing, UploadStatus::Complete) {
            return false;
        }
        outcome.storage_key = Some(storage_key);
        outcome.stored_sha256 = Some(stored_sha256);
        outcome.finished_at = Some(Instant::now());
        true
    }

    /// Record a received chunk, replacing any earlier copy of the same index.
    /// Returns the number of distinct chunks received.
    pub async fn record_chunk(&self, index: u32, record: ChunkRecord) -> u32 {
        let mut chunks = self.chunks.lock().await;
        chunks.insert(index, record);
        chunks.len() as u32
    }

    pub async fn chunks_received(&self) -> u32 {
        self.chunks.lock().await.len() as u32
    }

    pub async fn bytes_received(&self) -> u64 {
        self.chunks.lock().await.values().map(|c| c.length).sum()
    }

    pub async fn failure(&self) -> Option<FailureReason> {
        self.outcome.lock().await.failure.clone()
    }

    pub async fn storage_key(&self) -> Option<String> {
        self.outcome.lock().await.storage_key.clone()
    }

    /// Time since the session was opened
    pub fn age(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Time since the session reached a terminal status
    pub async fn time_since_finished(&self) -> Option<std::time::Duration> {
        self.outcome.lock().await.finished_at.map(|t| t.elapsed())
    }

    pub async fn write_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    pub async fn write_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write().await
    }

    /// Consistent snapshot for `get_status`.
    pub async fn report(&self) -> StatusReport {
        let (status, error, storage_key, stored_sha256) = {
            let outcome = self.outcome.lock().await;
            (
                self.status(),
                outcome.failure.clone(),
                outcome.storage_key.clone(),
                outcome.stored_sha256.clone(),
            )
        };

        let (chunks_received, bytes_received) = {
            let chunks = self.chunks.lock().await;
            (
                chunks.len() as u32,
                chunks.values().map(|c| c.length).sum(),
            )
        };

        StatusReport {
            upload_id: self.upload_id,
            status,
            error,
            chunks_received,
            total_chunks: self.chunk_plan.count,
            bytes_received,
            storage_key,
            stored_sha256,
            created_at: self.created_at,
        }
    }
}

/// Table of upload sessions keyed by upload ID.
#[derive(Debug)]
pub struct UploadRegistry {
    sessions: RwLock<HashMap<UploadId, Arc<SessionEntry>>>,
    max_active: usize,
}

impl UploadRegistry {
    pub fn new(max_active: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_active,
        }
    }

    /// Add a session, unless `max_active` sessions are already pending or processing.
    pub async fn insert(&self, entry: SessionEntry) -> Result<Arc<SessionEntry>, IngestError> {
        let mut sessions = self.sessions.write().await;

        let active = sessions
            .values()
            .filter(|s| !s.status().is_terminal())
            .count();
        if active >= self.max_active {
            return Err(IngestError::TooManyUploads {
                limit: self.max_active,
            });
        }

        let entry = Arc::new(entry);
        sessions.insert(entry.upload_id, entry.clone());
        Ok(entry)
    }

    pub async fn get(&self, upload_id: UploadId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(&upload_id).cloned()
    }

    pub async fn remove(&self, upload_id: UploadId) -> Option<Arc<SessionEntry>> {
        self.sessions.write().await.remove(&upload_id)
    }

    pub async fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Sessions still pending or processing
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.status().is_terminal())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }
}
