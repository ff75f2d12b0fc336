use sift_core::{FailureReason, PipelineStep, UploadStatus};
use sift_infra::FixedWindowRateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::chunk_writer::ChunkWriter;
use crate::quota::QuotaManager;
use crate::registry::{SessionEntry, UploadRegistry};

/// Counts from one sweep cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Pending sessions failed as expired and removed
    pub expired: usize,
    /// Stale sessions left alone because they were processing
    pub skipped_processing: usize,
    /// Terminal sessions removed from the registry
    pub reclaimed: usize,
    pub rate_windows_purged: usize,
}

/// Periodic reclamation of stale sessions and idle rate-limiter windows.
pub struct Sweeper {
    registry: Arc<UploadRegistry>,
    quota: Arc<QuotaManager>,
    rate_limiter: Arc<FixedWindowRateLimiter>,
    chunk_writer: Arc<ChunkWriter>,
    staleness_deadline: Duration,
    sweep_interval: Duration,
}

impl Sweeper {
    pub fn new(
        registry: Arc<UploadRegistry>,
        quota: Arc<QuotaManager>,
        rate_limiter: Arc<FixedWindowRateLimiter>,
        chunk_writer: Arc<ChunkWriter>,
        staleness_deadline: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            quota,
            rate_limiter,
            chunk_writer,
            staleness_deadline,
            sweep_interval,
        }
    }

    /// Start the background sweep task
    /// Returns a JoinHandle that completes once `shutdown` is cancelled
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.sweep_interval);
            // The first tick completes immediately
            sweep_interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Sweeper stopped");
                        break;
                    }
                    _ = sweep_interval.tick() => {
                        let stats = self.sweep_once().await;
                        tracing::info!(
                            expired = stats.expired,
                            skipped_processing = stats.skipped_processing,
                            reclaimed = stats.reclaimed,
                            rate_windows_purged = stats.rate_windows_purged,
                            "Sweep completed"
                        );
                    }
                }
            }
        })
    }

    /// Run a single sweep cycle.
    #[tracing::instrument(skip(self), fields(step = %PipelineStep::Sweep))]
    pub async fn sweep_once(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        for session in self.registry.snapshot().await {
            match session.status() {
                UploadStatus::Pending => {
                    if session.age() > self.staleness_deadline && self.expire(&session).await {
                        stats.expired += 1;
                    }
                }
                UploadStatus::Processing => {
                    if session.age() > self.staleness_deadline {
                        tracing::debug!(
                            upload_id = %session.upload_id,
                            "Stale session is processing, deferring to a later sweep"
                        );
                        stats.skipped_processing += 1;
                    }
                }
                UploadStatus::Complete | UploadStatus::Failed => {
                    if self.reclaim_terminal(&session).await {
                        stats.reclaimed += 1;
                    }
                }
            }
        }

        stats.rate_windows_purged = self.rate_limiter.purge_expired().await;
        stats
    }

    /// Fail a stale pending session and release everything it holds.
    async fn expire(&self, session: &Arc<SessionEntry>) -> bool {
        // Let any chunk write still in flight finish first
        let _gate = session.write_exclusive().await;

        if !session
            .mark_failed(UploadStatus::Pending, FailureReason::Expired)
            .await
        {
            // Finalize won the race
            return false;
        }

        tracing::info!(
            upload_id = %session.upload_id,
            user_id = %session.user_id,
            age_secs = session.age().as_secs(),
            "Expiring stale upload"
        );

        self.remove_artifact(session).await;
        self.quota
            .release(session.user_id, session.file_info.size)
            .await;
        self.registry.remove(session.upload_id).await;
        true
    }

    async fn reclaim_terminal(&self, session: &Arc<SessionEntry>) -> bool {
        match session.time_since_finished().await {
            Some(elapsed) if elapsed > self.staleness_deadline => {}
            _ => return false,
        }

        let retains = session
            .failure()
            .await
            .map(|reason| reason.retains_artifact())
            .unwrap_or(false);
        if !retains {
            self.remove_artifact(session).await;
        }

        self.registry.remove(session.upload_id).await;
        tracing::debug!(
            upload_id = %session.upload_id,
            status = %session.status(),
            "Reclaimed finished upload"
        );
        true
    }

    async fn remove_artifact(&self, session: &SessionEntry) {
        if let Err(e) = self.chunk_writer.remove(&session.temp_path).await {
            tracing::warn!(
                upload_id = %session.upload_id,
                path = %session.temp_path.display(),
                error = %e,
                "Failed to remove temporary artifact"
            );
        }
    }
}
