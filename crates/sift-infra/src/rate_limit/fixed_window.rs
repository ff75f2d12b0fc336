use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use sift_core::UserId;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_SHARD_COUNT: usize = 16;
const DEFAULT_MAX_WINDOWS_PER_SHARD: usize = 10_000;

/// Request counter for one user.
#[derive(Clone, Debug)]
struct Window {
    count: u32,
    started_at: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Reset when the window has elapsed, then count this request.
    /// Returns the count including this request.
    fn hit(&mut self, now: Instant, window: Duration) -> u32 {
        if now.saturating_duration_since(self.started_at) > window {
            self.count = 0;
            self.started_at = now;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.started_at))
    }

    fn is_stale(&self, now: Instant, idle_after: Duration) -> bool {
        now.saturating_duration_since(self.started_at) > idle_after
    }
}

/// Per-user fixed-window request limiter.
///
/// Windows live in several independently locked shards so concurrent users rarely
/// contend on the same mutex. A window resets once more than `window` has passed since
/// it started; calls are counted before they are compared, so rejected calls still
/// consume the window.
#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    shards: Vec<Arc<Mutex<HashMap<UserId, Window>>>>,
    max_requests: u32,
    window: Duration,
    max_windows_per_shard: usize,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_shards(max_requests, window, DEFAULT_SHARD_COUNT)
    }

    pub fn with_shards(max_requests: u32, window: Duration, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Arc::new(Mutex::new(HashMap::new())))
            .collect();
        Self {
            shards,
            max_requests,
            window,
            max_windows_per_shard: DEFAULT_MAX_WINDOWS_PER_SHARD,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn shard_for(&self, user: &UserId) -> &Arc<Mutex<HashMap<UserId, Window>>> {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Count one request for `user`.
    ///
    /// Returns the remaining allowance in the current window, or how long until the
    /// window resets when the user is over the limit.
    pub async fn check(&self, user: UserId) -> Result<u32, Duration> {
        let now = Instant::now();
        let mut windows = self.shard_for(&user).lock().await;

        if windows.len() >= self.max_windows_per_shard && !windows.contains_key(&user) {
            let idle_after = self.idle_after();
            windows.retain(|_, w| !w.is_stale(now, idle_after));

            if windows.len() >= self.max_windows_per_shard {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started_at)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                    tracing::debug!(
                        evicted_user = %oldest,
                        "Evicted oldest rate limit window due to capacity limit"
                    );
                }
            }
        }

        let entry = windows.entry(user).or_insert_with(|| Window::new(now));
        let count = entry.hit(now, self.window);
        if count > self.max_requests {
            Err(entry.retry_after(now, self.window))
        } else {
            Ok(self.max_requests - count)
        }
    }

    /// Drop windows that expired and have been idle for another full window.
    /// Returns the number of windows removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let idle_after = self.idle_after();
        let mut purged = 0;

        for shard in &self.shards {
            let mut windows = shard.lock().await;
            let before = windows.len();
            windows.retain(|_, w| !w.is_stale(now, idle_after));
            purged += before - windows.len();
        }

        if purged > 0 {
            tracing::debug!(windows_purged = purged, "Purged expired rate limit windows");
        }
        purged
    }

    /// Number of users with a live window.
    pub async fn tracked_users(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    fn idle_after(&self) -> Duration {
        self.window.saturating_mul(2)
    }
}
