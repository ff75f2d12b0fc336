//! Hooks for external collaborators
//!
//! The ingestion core accounts storage per user but does not own the persistence layer.
//! Whatever backs user quotas (a database, a billing service) implements [`QuotaStore`].

use async_trait::async_trait;

use crate::models::UserId;

/// Persistence contract for per-user cumulative byte usage.
///
/// Usage is never decremented by the ingestion core.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Bytes currently charged to the user (0 for unknown users).
    async fn get_user_quota(&self, user_id: UserId) -> anyhow::Result<u64>;

    /// Charge `bytes` to the user.
    async fn increment_user_quota(&self, user_id: UserId, bytes: u64) -> anyhow::Result<()>;
}
