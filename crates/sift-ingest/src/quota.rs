//! Per-user quota accounting.
//!
//! Usage lives in the external [`QuotaStore`]; this manager adds in-flight
//! reservations so concurrent initiations cannot jointly overshoot the limit. A user
//! is charged only by [`QuotaManager::commit`], after an upload has completed.

use sift_core::{IngestError, QuotaStore, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct QuotaManager {
    store: Arc<dyn QuotaStore>,
    limit: u64,
    reservations: Mutex<HashMap<UserId, u64>>,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn QuotaStore>, limit: u64) -> Self {
        Self {
            store,
            limit,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Fail unless stored usage plus open reservations plus `size` fits the limit.
    /// Returns the usage the check was made against.
    pub async fn check_projected(&self, user_id: UserId, size: u64) -> Result<u64, IngestError> {
        let reservations = self.reservations.lock().await;
        self.check_locked(&reservations, user_id, size).await
    }

    async fn check_locked(
        &self,
        reservations: &HashMap<UserId, u64>,
        user_id: UserId,
        size: u64,
    ) -> Result<u64, IngestError> {
        let stored = self
            .store
            .get_user_quota(user_id)
            .await
            .map_err(IngestError::QuotaStore)?;
        let used = stored.saturating_add(reservations.get(&user_id).copied().unwrap_or(0));

        match used.checked_add(size) {
            Some(projected) if projected <= self.limit => Ok(used),
            _ => Err(IngestError::QuotaExceeded {
                used,
                requested: size,
                limit: self.limit,
            }),
        }
    }

    /// Check the projected usage and hold `size` bytes for the user.
    pub async fn reserve(&self, user_id: UserId, size: u64) -> Result<(), IngestError> {
        let mut reservations = self.reservations.lock().await;
        self.check_locked(&reservations, user_id, size).await?;
        *reservations.entry(user_id).or_insert(0) += size;
        Ok(())
    }

    /// Drop a reservation without charging the user.
    pub async fn release(&self, user_id: UserId, size: u64) {
        let mut reservations = self.reservations.lock().await;
        release_locked(&mut reservations, user_id, size);
    }

    /// Charge the user for a completed upload and drop its reservation.
    ///
    /// The reservation lock is held across the store write so a concurrent check
    /// never sees the bytes both charged and reserved.
    pub async fn commit(&self, user_id: UserId, size: u64) -> anyhow::Result<()> {
        let mut reservations = self.reservations.lock().await;
        let result = self.store.increment_user_quota(user_id, size).await;
        release_locked(&mut reservations, user_id, size);
        result
    }

    /// Bytes currently reserved for the user
    pub async fn reserved(&self, user_id: UserId) -> u64 {
        self.reservations
            .lock()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }
}

fn release_locked(reservations: &mut HashMap<UserId, u64>, user_id: UserId, size: u64) {
    if let Some(held) = reservations.get_mut(&user_id) {
        *held = held.saturating_sub(size);
        if *held == 0 {
            reservations.remove(&user_id);
        }
    }
}
