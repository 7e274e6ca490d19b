use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limits on the sync and mutation endpoints, tracked per user
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<LimiterState>>,
    window: Duration,
    bulk_sync_limit: u32,
    mutation_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedEndpoint {
    BulkSync,
    Mutation,
}

struct LimiterState {
    /// One window slot per protected endpoint, indexed by `ProtectedEndpoint::slot`
    users: HashMap<String, [Option<RateWindow>; ProtectedEndpoint::COUNT]>,
    last_sweep: Instant,
}

#[derive(Default)]
struct EndpointCounters {
    allowed: AtomicU64,
    limited: AtomicU64,
}

#[derive(Default)]
struct RateLimitMetrics {
    endpoints: [EndpointCounters; ProtectedEndpoint::COUNT],
    tracked_users: AtomicUsize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub bulk_sync_allowed: u64,
    pub bulk_sync_limited: u64,
    pub mutation_allowed: u64,
    pub mutation_limited: u64,
    pub tracked_users: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl RateWindow {
    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.started_at) >= window
    }
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.bulk_sync_rate_limit_per_window,
            config.mutation_rate_limit_per_window,
        )
    }

    fn new(window: Duration, bulk_sync_limit: u32, mutation_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                users: HashMap::new(),
                last_sweep: Instant::now(),
            })),
            window,
            bulk_sync_limit,
            mutation_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::BulkSync => self.bulk_sync_limit,
            ProtectedEndpoint::Mutation => self.mutation_limit,
        };

        let now = Instant::now();
        let mut guard = self.state.lock().await;
        self.sweep_expired(&mut guard, now);

        let tracked = guard.users.len() + usize::from(!guard.users.contains_key(user_id));
        self.metrics.tracked_users.store(tracked, Ordering::Relaxed);
        let slots = guard
            .users
            .entry(user_id.to_owned())
            .or_insert([None; ProtectedEndpoint::COUNT]);

        let entry = slots[endpoint.slot()].get_or_insert(RateWindow {
            started_at: now,
            count: 0,
        });
        if entry.is_expired(now, self.window) {
            entry.started_at = now;
            entry.count = 0;
        }

        let counters = &self.metrics.endpoints[endpoint.slot()];
        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            counters.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("Rate limit exceeded for {}", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        counters.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop users whose windows have all expired, at most once per window.
    fn sweep_expired(&self, state: &mut LimiterState, now: Instant) {
        if now.duration_since(state.last_sweep) < self.window {
            return;
        }
        let window = self.window;
        let before = state.users.len();
        state.users.retain(|_, slots| {
            slots
                .iter()
                .flatten()
                .any(|entry| !entry.is_expired(now, window))
        });
        state.last_sweep = now;

        let evicted = before - state.users.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired rate limit windows");
        }
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let [bulk_sync, mutation] = &self.metrics.endpoints;
        RateLimitMetricsSnapshot {
            bulk_sync_allowed: bulk_sync.allowed.load(Ordering::Relaxed),
            bulk_sync_limited: bulk_sync.limited.load(Ordering::Relaxed),
            mutation_allowed: mutation.allowed.load(Ordering::Relaxed),
            mutation_limited: mutation.limited.load(Ordering::Relaxed),
            tracked_users: self.metrics.tracked_users.load(Ordering::Relaxed),
        }
    }
}

impl ProtectedEndpoint {
    const COUNT: usize = 2;

    const fn slot(self) -> usize {
        match self {
            Self::BulkSync => 0,
            Self::Mutation => 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::BulkSync => "bulk_sync",
            Self::Mutation => "mutation",
        }
    }
}

/// Stable per-process hash so logs never carry raw user ids.
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
