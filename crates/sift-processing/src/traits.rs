//! Collaborator contracts used by the finalize pipeline.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Outcome of a completed malware scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanReport {
    pub is_infected: bool,
    /// Threat names reported by the engine (empty when clean)
    pub threats: Vec<String>,
}

impl ScanReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn infected(threats: Vec<String>) -> Self {
        Self {
            is_infected: true,
            threats,
        }
    }
}

/// Malware scanning engine.
///
/// `Err` means the engine could not produce a verdict. Implementations should stop
/// any outstanding work once `cancel` fires; the caller has already given up on them.
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, path: &Path, cancel: CancellationToken) -> anyhow::Result<ScanReport>;
}
