//! Rate limiting for the relay.
//!
//! Two layers: a global request-per-second cap across all callers, and a
//! per-identity submission cap keyed by [`UserId`]. Clients are keyed by
//! their authenticated identity rather than IP address, since the relay is
//! expected to sit behind proxies and the identity is the only stable
//! handle.
//!
//! Both use the governor crate's rate limiters; the keyed one is backed by
//! DashMap and shrunk periodically by a background task.

use std::num::NonZeroU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use post_types::UserId;
use tokio::time::interval;

use crate::config::LimitsConfig;
use crate::error::{RelayError, Result};
use crate::server::RelayMetrics;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// How often the background task evicts idle per-user limiter entries.
const SHRINK_INTERVAL_SECS: u64 = 60;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Global limiter across all callers, `limits.global_requests_per_second`.
    global: Arc<DirectLimiter>,

    /// Per-identity submission limiter, `limits.submissions_per_minute`.
    per_user: Arc<KeyedLimiter<UserId>>,

    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("global", &"DirectLimiter")
            .field("per_user", &"KeyedLimiter<UserId>")
            .finish_non_exhaustive()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured values are zero.
    pub fn new(config: &LimitsConfig, metrics: Arc<RelayMetrics>) -> Self {
        let global_rps = NonZeroU32::new(config.global_requests_per_second)
            .expect("global_requests_per_second must be > 0");
        let global_quota = Quota::per_second(global_rps);

        let submissions = NonZeroU32::new(config.submissions_per_minute)
            .expect("submissions_per_minute must be > 0");
        let submission_quota = Quota::per_minute(submissions);

        Self {
            global: Arc::new(RateLimiter::direct(global_quota)),
            per_user: Arc::new(RateLimiter::keyed(submission_quota)),
            metrics,
        }
    }

    /// Check the server-wide request rate.
    ///
    /// Caps aggregate throughput even when every individual caller stays
    /// within their own quota.
    pub fn check_global(&self) -> Result<()> {
        self.global.check().map_err(|_| {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            RelayError::RateLimited
        })
    }

    /// Check whether `user` may perform another submission.
    pub fn check_user(&self, user: &UserId) -> Result<()> {
        self.per_user.check_key(user).map_err(|_| {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Submission rate limit hit for {}", user);
            RelayError::RateLimited
        })
    }

    /// Number of identities currently tracked by the keyed limiter.
    pub fn tracked_users(&self) -> usize {
        self.per_user.len()
    }

    /// Evict per-user entries whose quota has fully recharged.
    ///
    /// Idle identities would otherwise accumulate in the DashMap forever.
    pub fn shrink(&self) {
        self.per_user.retain_recent();
    }
}

/// Spawn a background task that periodically shrinks the keyed limiter.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_shrink_task(limits: RateLimits) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Rate limiter shrink task started (interval: {}s)",
            SHRINK_INTERVAL_SECS
        );
        let mut timer = interval(Duration::from_secs(SHRINK_INTERVAL_SECS));
        loop {
            timer.tick().await;
            let before = limits.tracked_users();
            limits.shrink();
            let after = limits.tracked_users();
            if before != after {
                tracing::debug!("Rate limiter shrink: {} -> {} tracked users", before, after);
            }
        }
    })
}
