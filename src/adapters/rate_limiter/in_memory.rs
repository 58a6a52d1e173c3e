//! In-memory rate limiter implementation for single-process deployments.
//!
//! Uses a sliding-window log: every allowed hit's timestamp is kept until it
//! falls out of the window. Exceeding the limit blocks the identifier for
//! the policy's block duration.
//!
//! # Limitation
//!
//! State lives in this process only. When the API runs as several processes
//! each one enforces its own, independent limit, so a client can get up to
//! `max × processes` hits per window. Use `RedisRateLimiter` once the API is
//! scaled horizontally.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time;

use crate::domain::foundation::{Clock, SystemClock, Timestamp};
use crate::ports::{
    DenialReason, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStats, RateLimiter,
};

use super::config::RateLimitPolicy;

/// How often idle entries are evicted.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// In-memory rate limiter for one namespace.
pub struct InMemoryRateLimiter {
    namespace: String,
    policy: RateLimitPolicy,
    /// Per-key ledger, keyed by `namespace:identifier`.
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Hit ledger and block state for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Entry {
    /// Allowed hits, oldest first, in epoch milliseconds.
    hits: VecDeque<i64>,
    /// Epoch milliseconds until which every check is denied.
    blocked_until: Option<i64>,
}

impl Entry {
    /// Applies one check at `now` and returns its outcome.
    pub(crate) fn record(&mut self, now: i64, policy: &RateLimitPolicy) -> RateLimitResult {
        let window = policy.window_ms as i64;

        if let Some(until) = self.blocked_until {
            if now < until {
                return RateLimitResult::denied(
                    DenialReason::Blocked,
                    Timestamp::from_millis(until),
                    Some(self.hits.len() as u32),
                );
            }
            // Block served: history is wiped, counting restarts from zero.
            self.blocked_until = None;
            self.hits.clear();
        }

        self.prune(now - window);

        if self.hits.len() as u32 >= policy.max {
            let until = now + policy.block_duration_ms as i64;
            self.blocked_until = Some(until);
            return RateLimitResult::denied(
                DenialReason::LimitExceeded,
                Timestamp::from_millis(until),
                Some(self.hits.len() as u32),
            );
        }

        self.hits.push_back(now);
        let count = self.hits.len() as u32;
        let oldest = self.hits.front().copied().unwrap_or(now);

        RateLimitResult::allowed(
            policy.max - count,
            Timestamp::from_millis(oldest + window),
            count,
        )
    }

    /// Drops hits at or before `cutoff`.
    fn prune(&mut self, cutoff: i64) {
        while self.hits.front().is_some_and(|&hit| hit <= cutoff) {
            self.hits.pop_front();
        }
    }

    fn is_blocked(&self, now: i64) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Whether the sweep may drop this entry.
    ///
    /// Entries serving a block are always kept.
    fn is_evictable(&self, now: i64, window_ms: i64) -> bool {
        if self.is_blocked(now) {
            return false;
        }
        match self.hits.back() {
            None => true,
            Some(&newest) => newest < now - 2 * window_ms,
        }
    }
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl InMemoryRateLimiter {
    /// Create a limiter for `namespace` using wall-clock time.
    ///
    /// When called inside a Tokio runtime a background sweep is started.
    pub fn new(namespace: impl Into<String>, policy: RateLimitPolicy) -> Self {
        Self::with_clock(namespace, policy, Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock.
    pub fn with_clock(
        namespace: impl Into<String>,
        policy: RateLimitPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = Self {
            namespace: namespace.into(),
            policy,
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            sweeper: Mutex::new(None),
        };
        limiter.start_sweeper(SWEEP_INTERVAL);
        limiter
    }

    /// The namespace this limiter counts in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Evicts idle entries now, returning how many were dropped.
    ///
    /// The background sweep calls this; it is also useful in tests.
    pub async fn sweep(&self) -> usize {
        sweep_entries(
            &self.entries,
            self.policy.window_ms as i64,
            self.clock.now_millis(),
        )
        .await
    }

    /// Stops the background sweep. Further checks keep working.
    pub fn shutdown(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(sweeper) = sweeper.take() {
                let _ = sweeper.shutdown.send(true);
                sweeper.handle.abort();
            }
        }
    }

    /// Whether a background sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|s| s.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }

    fn start_sweeper(&self, every: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                namespace = %self.namespace,
                "no Tokio runtime; in-memory rate limiter will not sweep idle entries"
            );
            return;
        };

        let entries: Weak<RwLock<HashMap<String, Entry>>> = Arc::downgrade(&self.entries);
        let clock = Arc::clone(&self.clock);
        let window_ms = self.policy.window_ms as i64;
        let namespace = self.namespace.clone();
        let (shutdown, mut stop) = watch::channel(false);

        let handle = runtime.spawn(async move {
            let mut interval = time::interval(every);
            // The first tick fires immediately; nothing to sweep yet.
            interval.tick().await;

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let Some(entries) = entries.upgrade() else {
                            break;
                        };
                        let evicted = sweep_entries(&entries, window_ms, clock.now_millis()).await;
                        if evicted > 0 {
                            tracing::info!(namespace = %namespace, evicted, "swept idle rate limit entries");
                        }
                    }
                }
            }
        });

        if let Ok(mut sweeper) = self.sweeper.lock() {
            *sweeper = Some(Sweeper { shutdown, handle });
        }
    }
}

async fn sweep_entries(
    entries: &RwLock<HashMap<String, Entry>>,
    window_ms: i64,
    now: i64,
) -> usize {
    let mut entries = entries.write().await;
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_evictable(now, window_ms));
    before - entries.len()
}

impl Drop for InMemoryRateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimiter")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, identifier: &str) -> Result<RateLimitResult, RateLimitError> {
        let key = RateLimitKey::new(self.namespace.as_str(), identifier).local_key();
        let now = self.clock.now_millis();

        let mut entries = self.entries.write().await;
        let result = entries.entry(key).or_default().record(now, &self.policy);
        drop(entries);

        if result.reason == Some(DenialReason::LimitExceeded) {
            tracing::warn!(
                namespace = %self.namespace,
                identifier,
                blocked_until = result.reset_at.as_millis(),
                "rate limit exceeded, identifier blocked"
            );
        }

        Ok(result)
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = RateLimitKey::new(self.namespace.as_str(), identifier).local_key();
        self.entries.write().await.remove(&key);
        Ok(())
    }

    async fn stats(&self) -> Result<RateLimitStats, RateLimitError> {
        let now = self.clock.now_millis();
        let entries = self.entries.read().await;

        Ok(RateLimitStats {
            total_keys: entries.len(),
            blocked_keys: entries.values().filter(|e| e.is_blocked(now)).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::ManualClock;
    use proptest::prelude::*;

    fn policy(max: u32, window_ms: u64, block_ms: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(max, Duration::from_millis(window_ms))
            .with_block_duration(Duration::from_millis(block_ms))
    }

    fn limiter(max: u32, window_ms: u64, block_ms: u64) -> (InMemoryRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(Timestamp::from_millis(1_000_000)));
        let limiter =
            InMemoryRateLimiter::with_clock("test", policy(max, window_ms, block_ms), clock.clone());
        (limiter, clock)
    }

    // ─── Window Tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn remaining_counts_down_then_denies() {
        let (limiter, _) = limiter(5, 60_000, 900_000);

        for expected in (0..5).rev() {
            let result = limiter.check("10.0.0.1").await.unwrap();
            assert!(result.is_allowed());
            assert_eq!(result.remaining, expected);
        }

        let result = limiter.check("10.0.0.1").await.unwrap();
        assert!(result.is_denied());
        assert_eq!(result.remaining, 0);
        assert_eq!(result.reason, Some(DenialReason::LimitExceeded));
    }

    #[tokio::test]
    async fn reset_at_tracks_oldest_hit_in_window() {
        let (limiter, clock) = limiter(3, 1_000, 5_000);

        let first = limiter.check("ip").await.unwrap();
        assert_eq!(first.reset_at.as_millis(), 1_001_000);

        clock.advance(Duration::from_millis(400));
        let second = limiter.check("ip").await.unwrap();
        assert_eq!(second.reset_at.as_millis(), 1_001_000);
        assert_eq!(second.total_hits, Some(2));
    }

    #[tokio::test]
    async fn old_hits_slide_out_of_window() {
        let (limiter, clock) = limiter(2, 1_000, 5_000);

        limiter.check("ip").await.unwrap();
        clock.advance(Duration::from_millis(600));
        limiter.check("ip").await.unwrap();

        // First hit is now older than the window.
        clock.advance(Duration::from_millis(500));
        let result = limiter.check("ip").await.unwrap();
        assert!(result.is_allowed());
        assert_eq!(result.remaining, 0);
    }

    // ─── Block Tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn documented_scenario_blocks_then_recovers() {
        let (limiter, clock) = limiter(2, 1_000, 5_000);
        let start = clock.now_millis();

        let r = limiter.check("ip1").await.unwrap();
        assert!(r.allowed);
        assert_eq!(r.remaining, 1);

        let r = limiter.check("ip1").await.unwrap();
        assert!(r.allowed);
        assert_eq!(r.remaining, 0);

        let r = limiter.check("ip1").await.unwrap();
        assert!(!r.allowed);
        assert_eq!(r.remaining, 0);
        assert_eq!(r.reset_at.as_millis(), start + 5_000);

        clock.advance(Duration::from_millis(5_000));
        let r = limiter.check("ip1").await.unwrap();
        assert!(r.allowed);
        assert_eq!(r.remaining, 1);
    }

    #[tokio::test]
    async fn block_outlasts_window() {
        let (limiter, clock) = limiter(1, 1_000, 10_000);

        limiter.check("ip").await.unwrap();
        let exceeded = limiter.check("ip").await.unwrap();
        assert!(exceeded.is_denied());

        // Several windows later the block still holds.
        for _ in 0..9 {
            clock.advance(Duration::from_millis(1_000));
            let result = limiter.check("ip").await.unwrap();
            assert!(result.is_denied());
            assert_eq!(result.reason, Some(DenialReason::Blocked));
            assert_eq!(result.reset_at, exceeded.reset_at);
        }
    }

    #[tokio::test]
    async fn blocked_checks_do_not_record_hits() {
        let (limiter, clock) = limiter(2, 60_000, 1_000);

        limiter.check("ip").await.unwrap();
        limiter.check("ip").await.unwrap();
        limiter.check("ip").await.unwrap();
        for _ in 0..10 {
            let r = limiter.check("ip").await.unwrap();
            assert_eq!(r.total_hits, Some(2));
        }

        // Block over: history is cleared even though the window has not passed.
        clock.advance(Duration::from_millis(1_000));
        let r = limiter.check("ip").await.unwrap();
        assert!(r.is_allowed());
        assert_eq!(r.remaining, 1);
        assert_eq!(r.total_hits, Some(1));
    }

    // ─── Reset / Isolation Tests ─────────────────────────────────────

    #[tokio::test]
    async fn reset_behaves_like_new_identifier() {
        let (limiter, _) = limiter(3, 60_000, 60_000);

        for _ in 0..4 {
            limiter.check("ip").await.unwrap();
        }
        assert!(limiter.check("ip").await.unwrap().is_denied());

        limiter.reset("ip").await.unwrap();

        let result = limiter.check("ip").await.unwrap();
        assert!(result.is_allowed());
        assert_eq!(result.remaining, 2);
    }

    #[tokio::test]
    async fn identifiers_have_independent_ledgers() {
        let (limiter, _) = limiter(1, 60_000, 60_000);

        limiter.check("1.1.1.1").await.unwrap();
        assert!(limiter.check("1.1.1.1").await.unwrap().is_denied());

        assert!(limiter.check("2.2.2.2").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn stats_count_tracked_and_blocked_keys() {
        let (limiter, clock) = limiter(1, 60_000, 1_000);

        limiter.check("a").await.unwrap();
        limiter.check("b").await.unwrap();
        limiter.check("b").await.unwrap();

        let stats = limiter.stats().await.unwrap();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.blocked_keys, 1);

        clock.advance(Duration::from_millis(1_000));
        let stats = limiter.stats().await.unwrap();
        assert_eq!(stats.blocked_keys, 0);
    }

    // ─── Sweep Tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn sweep_evicts_stale_entries() {
        let (limiter, clock) = limiter(5, 1_000, 5_000);

        limiter.check("stale").await.unwrap();
        clock.advance(Duration::from_millis(2_500));
        limiter.check("fresh").await.unwrap();

        assert_eq!(limiter.sweep().await, 1);
        let stats = limiter.stats().await.unwrap();
        assert_eq!(stats.total_keys, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_blocked_entries() {
        let (limiter, clock) = limiter(1, 1_000, 60_000);

        limiter.check("abuser").await.unwrap();
        limiter.check("abuser").await.unwrap();

        clock.advance(Duration::from_millis(10_000));
        assert_eq!(limiter.sweep().await, 0);
        assert!(limiter.check("abuser").await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn sweep_drops_entries_after_block_lapses() {
        let (limiter, clock) = limiter(1, 1_000, 2_000);

        limiter.check("ip").await.unwrap();
        limiter.check("ip").await.unwrap();

        clock.advance(Duration::from_millis(3_000));
        assert_eq!(limiter.sweep().await, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_background_sweep() {
        let (limiter, _) = limiter(1, 1_000, 1_000);
        assert!(limiter.is_sweeping());

        limiter.shutdown();
        assert!(!limiter.is_sweeping());

        // Still usable after the sweeper is gone.
        assert!(limiter.check("ip").await.unwrap().is_allowed());
    }

    #[test]
    fn no_sweeper_outside_runtime() {
        let limiter = InMemoryRateLimiter::new("cli", policy(1, 1_000, 1_000));
        assert!(!limiter.is_sweeping());
    }

    // ─── Properties ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn never_allows_more_than_max_per_window(
            max in 1u32..8,
            window_ms in 10u64..500,
            gaps in proptest::collection::vec(0i64..200, 1..120),
        ) {
            let policy = policy(max, window_ms, window_ms * 3);
            let mut entry = Entry::default();
            let mut now = 0i64;
            let mut allowed_at = Vec::new();

            for gap in gaps {
                now += gap;
                let result = entry.record(now, &policy);
                if result.allowed {
                    allowed_at.push(now);
                    prop_assert!(result.remaining < max);
                } else {
                    prop_assert_eq!(result.remaining, 0);
                    prop_assert!(result.reset_at.as_millis() > now);
                }
            }

            for (i, &t) in allowed_at.iter().enumerate() {
                let in_window = allowed_at[i..]
                    .iter()
                    .take_while(|&&later| later < t + window_ms as i64)
                    .count();
                prop_assert!(in_window as u32 <= max);
            }
        }

        #[test]
        fn fresh_entry_counts_down_from_max(max in 1u32..50) {
            let policy = policy(max, 60_000, 60_000);
            let mut entry = Entry::default();
            for i in 0..max {
                let result = entry.record(0, &policy);
                prop_assert!(result.allowed);
                prop_assert_eq!(result.remaining, max - i - 1);
            }
            prop_assert!(!entry.record(0, &policy).allowed);
        }
    }
}
