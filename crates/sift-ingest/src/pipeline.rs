//! Finalize pipeline.
//!
//! Runs once per completed upload, after the session has been moved to `processing`.
//! Steps execute in a fixed order and each one can end the run:
//!
//! 1. combine: every chunk present and the artifact has the declared size
//! 2. integrity: SHA-256 of the artifact equals the declared digest
//! 3. malware scan, bounded by `scan_timeout`; infected artifacts go to quarantine
//! 4. metadata strip (best-effort) followed by a structural re-check. The stripper
//!    only stages a copy; it replaces the artifact here, and only if the strip
//!    finished within `strip_timeout`
//! 5. content type: magic number must identify the declared MIME type
//! 6. storage placement: digest the final bytes, then rename into the dated
//!    storage layout
//! 7. quota commit
//! 8. cleanup of whatever temporary artifact is left
//!
//! The terminal status is recorded after cleanup.
//!
//! Failures never escape [`FinalizePipeline::run`]; they are recorded on the session.

use chrono::Utc;
use sift_core::{FailureReason, IngestConfig, PipelineStep, UploadStatus};
use sift_infra::run_with_deadline;
use sift_processing::{sniff, MalwareScanner, MetadataStripper, StructureError};
use sift_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

/// Where a completed artifact was stored and the digest of the stored bytes.
struct Placement {
    storage_key: String,
    sha256: String,
}

use crate::chunk_writer::ChunkWriter;
use crate::integrity;
use crate::quota::QuotaManager;
use crate::registry::SessionEntry;

pub struct FinalizePipeline {
    config: Arc<IngestConfig>,
    scanner: Arc<dyn MalwareScanner>,
    stripper: Arc<dyn MetadataStripper>,
    storage: Arc<dyn Storage>,
    quota: Arc<QuotaManager>,
    chunk_writer: Arc<ChunkWriter>,
}

impl FinalizePipeline {
    pub fn new(
        config: Arc<IngestConfig>,
        scanner: Arc<dyn MalwareScanner>,
        stripper: Arc<dyn MetadataStripper>,
        storage: Arc<dyn Storage>,
        quota: Arc<QuotaManager>,
        chunk_writer: Arc<ChunkWriter>,
    ) -> Self {
        Self {
            config,
            scanner,
            stripper,
            storage,
            quota,
            chunk_writer,
        }
    }

    /// Drive a `processing` session to a terminal status.
    #[tracing::instrument(
        skip(self, session),
        fields(upload_id = %session.upload_id, user_id = %session.user_id)
    )]
    pub async fn run(&self, session: Arc<SessionEntry>) {
        if session.status() != UploadStatus::Processing {
            tracing::warn!(status = %session.status(), "Finalize called on a session that is not processing");
            return;
        }

        // Wait for chunk writes that were already in flight
        let _gate = session.write_exclusive().await;
        let start = std::time::Instant::now();
        let outcome = self.execute(&session).await;

        match &outcome {
            Ok(_) => {
                if let Err(e) = self
                    .quota
                    .commit(session.user_id, session.file_info.size)
                    .await
                {
                    tracing::error!(
                        step = %PipelineStep::QuotaCommit,
                        error = %e,
                        "Failed to charge quota for completed upload"
                    );
                }
            }
            Err(_) => {
                self.quota
                    .release(session.user_id, session.file_info.size)
                    .await;
            }
        }

        let retain_artifact = matches!(&outcome, Err(reason) if reason.retains_artifact());
        if !retain_artifact {
            if let Err(e) = self.chunk_writer.remove(&session.temp_path).await {
                tracing::warn!(
                    step = %PipelineStep::Cleanup,
                    path = %session.temp_path.display(),
                    error = %e,
                    "Failed to remove temporary artifact"
                );
            }
        }

        // Terminal status is recorded only after quota and cleanup are settled
        match outcome {
            Ok(placement) => {
                tracing::info!(
                    step = %PipelineStep::StoragePlacement,
                    storage_key = %placement.storage_key,
                    stored_sha256 = %placement.sha256,
                    size_bytes = session.file_info.size,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Upload complete"
                );
                session
                    .mark_complete(placement.storage_key, placement.sha256)
                    .await;
            }
            Err(reason) => {
                self.log_failure(&reason);
                session
                    .mark_failed(UploadStatus::Processing, reason)
                    .await;
            }
        }
    }

    async fn execute(&self, session: &SessionEntry) -> Result<Placement, FailureReason> {
        self.combine(session).await?;
        self.verify_integrity(session).await?;
        self.scan(session).await?;
        self.strip(session).await?;
        self.verify_content_type(session).await?;
        self.place(session).await
    }

    async fn combine(&self, session: &SessionEntry) -> Result<(), FailureReason> {
        let plan = session.chunk_plan;
        let received = session.chunks_received().await;
        if received != plan.count {
            return Err(FailureReason::IncompleteUpload {
                detail: format!("received {} of {} chunks", received, plan.count),
            });
        }

        let bytes = session.bytes_received().await;
        let on_disk = self
            .chunk_writer
            .len(&session.temp_path)
            .await
            .map_err(|e| FailureReason::IncompleteUpload {
                detail: format!("temporary artifact unreadable: {}", e),
            })?;

        if bytes != plan.total_size || on_disk != plan.total_size {
            return Err(FailureReason::IncompleteUpload {
                detail: format!(
                    "expected {} bytes, received {} and found {} on disk",
                    plan.total_size, bytes, on_disk
                ),
            });
        }
        Ok(())
    }

    async fn verify_integrity(&self, session: &SessionEntry) -> Result<(), FailureReason> {
        let actual = integrity::sha256_file(&session.temp_path)
            .await
            .map_err(|e| FailureReason::IncompleteUpload {
                detail: format!("temporary artifact unreadable: {}", e),
            })?;

        if !integrity::digests_match(&session.file_info.sha256, &actual) {
            return Err(FailureReason::IntegrityMismatch {
                expected: session.file_info.sha256.to_ascii_lowercase(),
                actual,
            });
        }
        Ok(())
    }

    async fn scan(&self, session: &SessionEntry) -> Result<(), FailureReason> {
        let scan_timeout = self.config.scan_timeout;
        let path = session.temp_path.as_path();
        let scanner = &self.scanner;

        let verdict = run_with_deadline("malware_scan", scan_timeout, |cancel| {
            scanner.scan(path, cancel)
        })
        .await;

        let report = match verdict {
            Err(_) => {
                return Err(FailureReason::ScanTimeout {
                    timeout_ms: scan_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Err(FailureReason::ScanUnavailable {
                    detail: e.to_string(),
                })
            }
            Ok(Ok(report)) => report,
        };

        if !report.is_infected {
            tracing::debug!(step = %PipelineStep::MalwareScan, "Scan clean");
            return Ok(());
        }

        let extension = session.allowed_type.canonical_extension();
        match self
            .storage
            .quarantine(&session.temp_path, session.upload_id, &extension)
            .await
        {
            Ok(quarantined) => tracing::warn!(
                step = %PipelineStep::MalwareScan,
                path = %quarantined.display(),
                "Infected artifact quarantined"
            ),
            // The artifact stays at its temporary path and is not cleaned up
            Err(e) => tracing::error!(
                step = %PipelineStep::MalwareScan,
                error = %e,
                path = %session.temp_path.display(),
                "Failed to quarantine infected artifact"
            ),
        }

        Err(FailureReason::MalwareDetected {
            threats: report.threats,
        })
    }

    async fn strip(&self, session: &SessionEntry) -> Result<(), FailureReason> {
        let expected = &session.allowed_type;
        let path = session.temp_path.as_path();

        let head = sniff::read_head(path, expected.sniff_len())
            .await
            .map_err(|e| FailureReason::SanitizationFailure {
                detail: format!("artifact unreadable: {}", e),
            })?;
        let signature_before = expected.matches(&head);

        let stripper = &self.stripper;
        match run_with_deadline("metadata_strip", self.strip_timeout(), |cancel| {
            stripper.strip_all(path, cancel)
        })
        .await
        {
            Ok(Ok(None)) => {}
            Ok(Ok(Some(staged))) => {
                if let Err(e) = staged.persist(path).await {
                    tracing::warn!(
                        step = %PipelineStep::MetadataStrip,
                        error = %e,
                        "Failed to install stripped artifact, continuing with original"
                    );
                }
            }
            Ok(Err(e)) => tracing::warn!(
                step = %PipelineStep::MetadataStrip,
                error = %e,
                "Metadata strip failed, continuing with original artifact"
            ),
            Err(e) => tracing::warn!(
                step = %PipelineStep::MetadataStrip,
                error = %e,
                "Metadata strip timed out, continuing with original artifact"
            ),
        }

        match sift_processing::verify_structure(expected, path).await {
            Ok(()) => Ok(()),
            // Never the declared type to begin with: reported by the content-type step
            Err(StructureError::SignatureMismatch { .. }) if !signature_before => Ok(()),
            Err(e) => Err(FailureReason::SanitizationFailure {
                detail: e.to_string(),
            }),
        }
    }

    async fn verify_content_type(&self, session: &SessionEntry) -> Result<(), FailureReason> {
        let head = sniff::read_head(&session.temp_path, sniff::head_len())
            .await
            .map_err(|e| FailureReason::SanitizationFailure {
                detail: format!("artifact unreadable: {}", e),
            })?;

        sniff::verify_content_type(
            &session.file_info.mime_type,
            &self.config.allowed_types,
            &head,
        )
        .map(|_| ())
        .map_err(|e| FailureReason::ContentTypeMismatch {
            declared: e.declared,
            detected: e.detected,
        })
    }

    async fn place(&self, session: &SessionEntry) -> Result<Placement, FailureReason> {
        let sha256 = integrity::sha256_file(&session.temp_path)
            .await
            .map_err(|e| FailureReason::StorageFailure {
                detail: format!("artifact unreadable: {}", e),
            })?;

        let extension = session.allowed_type.canonical_extension();
        let storage_key = self
            .storage
            .promote(
                &session.temp_path,
                session.upload_id,
                &extension,
                Utc::now().date_naive(),
            )
            .await
            .map_err(|e| FailureReason::StorageFailure {
                detail: e.to_string(),
            })?;

        Ok(Placement {
            storage_key,
            sha256,
        })
    }

    fn strip_timeout(&self) -> Duration {
        self.config.strip_timeout
    }

    fn log_failure(&self, reason: &FailureReason) {
        if reason.is_security_event() {
            tracing::error!(
                step = %reason.step(),
                code = reason.code(),
                reason = %reason,
                "Upload rejected"
            );
        } else {
            tracing::warn!(
                step = %reason.step(),
                code = reason.code(),
                reason = %reason,
                "Upload failed"
            );
        }
    }
}
