use async_trait::async_trait;
use sift_core::{QuotaStore, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local quota store. Usage is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    usage: Mutex<HashMap<UserId, u64>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user's usage
    pub async fn set_usage(&self, user_id: UserId, bytes: u64) {
        self.usage.lock().await.insert(user_id, bytes);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get_user_quota(&self, user_id: UserId) -> anyhow::Result<u64> {
        Ok(self.usage.lock().await.get(&user_id).copied().unwrap_or(0))
    }

    async fn increment_user_quota(&self, user_id: UserId, bytes: u64) -> anyhow::Result<()> {
        let mut usage = self.usage.lock().await;
        let used = usage.entry(user_id).or_insert(0);
        *used = used
            .checked_add(bytes)
            .ok_or_else(|| anyhow::anyhow!("quota counter overflow for user {}", user_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_unknown_user_has_zero_usage() {
        let store = InMemoryQuotaStore::new();
        let user = UserId::new(Uuid::new_v4());
        assert_eq!(store.get_user_quota(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let store = InMemoryQuotaStore::new();
        let user = UserId::new(Uuid::new_v4());
        store.set_usage(user, 10).await;
        store.increment_user_quota(user, 5).await.unwrap();
        store.increment_user_quota(user, 7).await.unwrap();
        assert_eq!(store.get_user_quota(user).await.unwrap(), 22);
    }

    #[tokio::test]
    async fn test_increment_overflow_is_an_error() {
        let store = InMemoryQuotaStore::new();
        let user = UserId::new(Uuid::new_v4());
        store.set_usage(user, u64::MAX).await;
        assert!(store.increment_user_quota(user, 1).await.is_err());
        assert_eq!(store.get_user_quota(user).await.unwrap(), u64::MAX);
    }
}
