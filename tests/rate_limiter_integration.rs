//! Integration tests for the rate limiter registry and in-memory limiters.
//!
//! These tests verify, through the public API only:
//! 1. The sliding window admits `max` hits and then blocks
//! 2. A served block starts counting from zero again
//! 3. Namespaces never share counters
//! 4. Reset is idempotent
//! 5. The registry hands out one limiter per `(namespace, max, window)`
//!
//! Time is driven by a `ManualClock`; no external services are needed.

use std::sync::Arc;
use std::time::Duration;

use rural24_guard::adapters::rate_limiter::{
    PolicyKind, RateLimitBackend, RateLimitPolicies, RateLimitPolicy, RateLimiterRegistry,
};
use rural24_guard::domain::foundation::{Clock, ManualClock, Timestamp};
use rural24_guard::ports::{DenialReason, RateLimiter};

// =============================================================================
// Test Infrastructure
// =============================================================================

const START_MS: i64 = 1_700_000_000_000;

fn registry_at(clock: Arc<ManualClock>) -> RateLimiterRegistry {
    RateLimiterRegistry::new(RateLimitBackend::InMemory).with_clock(clock)
}

fn two_per_second() -> RateLimitPolicy {
    RateLimitPolicy::new(2, Duration::from_secs(1)).with_block_duration(Duration::from_secs(5))
}

fn same_instance(a: &Arc<dyn RateLimiter>, b: &Arc<dyn RateLimiter>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// =============================================================================
// Window and block behavior
// =============================================================================

#[tokio::test]
async fn allows_two_then_blocks_then_recovers() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock.clone());
    let limiter = registry.limiter("login", two_per_second()).await.unwrap();

    let first = limiter.check("ip1").await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);

    let second = limiter.check("ip1").await.unwrap();
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);

    let third = limiter.check("ip1").await.unwrap();
    assert!(!third.allowed);
    assert_eq!(third.remaining, 0);
    assert_eq!(third.reason, Some(DenialReason::LimitExceeded));
    assert_eq!(third.reset_at.as_millis(), START_MS + 5_000);

    clock.advance(Duration::from_millis(4_999));
    let still_blocked = limiter.check("ip1").await.unwrap();
    assert_eq!(still_blocked.reason, Some(DenialReason::Blocked));

    clock.advance(Duration::from_millis(1));
    let recovered = limiter.check("ip1").await.unwrap();
    assert!(recovered.allowed);
    assert_eq!(recovered.remaining, 1);
}

#[tokio::test]
async fn hits_leave_the_window() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock.clone());
    let limiter = registry.limiter("search", two_per_second()).await.unwrap();

    limiter.check("ip").await.unwrap();
    clock.advance(Duration::from_millis(600));
    let second = limiter.check("ip").await.unwrap();
    assert_eq!(second.remaining, 0);
    assert_eq!(second.reset_at.as_millis(), START_MS + 1_000);

    clock.advance(Duration::from_millis(500));
    let third = limiter.check("ip").await.unwrap();
    assert!(third.allowed);
    assert_eq!(third.remaining, 0);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock);
    let policy = RateLimitPolicy::new(1, Duration::from_secs(60));

    let login = registry.limiter("login", policy).await.unwrap();
    let upload = registry.limiter("upload", policy).await.unwrap();

    assert!(login.check("same-user").await.unwrap().allowed);
    assert!(!login.check("same-user").await.unwrap().allowed);
    assert!(upload.check("same-user").await.unwrap().allowed);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock);
    let limiter = registry.limiter("auth", two_per_second()).await.unwrap();

    for _ in 0..3 {
        limiter.check("ip").await.unwrap();
    }
    assert!(!limiter.check("ip").await.unwrap().allowed);

    limiter.reset("ip").await.unwrap();
    limiter.reset("ip").await.unwrap();
    limiter.reset("never-seen").await.unwrap();

    let after = limiter.check("ip").await.unwrap();
    assert!(after.allowed);
    assert_eq!(after.remaining, 1);
}

#[tokio::test]
async fn stats_count_tracked_and_blocked_identifiers() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock);
    let limiter = registry
        .limiter("messaging", RateLimitPolicy::new(1, Duration::from_secs(60)))
        .await
        .unwrap();

    limiter.check("a").await.unwrap();
    limiter.check("b").await.unwrap();
    limiter.check("b").await.unwrap();

    let stats = limiter.stats().await.unwrap();
    assert_eq!(stats.total_keys, 2);
    assert_eq!(stats.blocked_keys, 1);
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn registry_memoizes_per_triple() {
    let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);

    let a = registry.limiter("api", two_per_second()).await.unwrap();
    let b = registry.limiter("api", two_per_second()).await.unwrap();
    let c = registry
        .limiter("api", RateLimitPolicy::new(2, Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(same_instance(&a, &b));
    assert!(!same_instance(&a, &c));
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn concurrent_first_calls_build_one_limiter() {
    let registry = Arc::new(RateLimiterRegistry::new(RateLimitBackend::InMemory));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.limiter("api", two_per_second()).await.unwrap() })
        })
        .collect();

    let mut limiters = Vec::new();
    for handle in handles {
        limiters.push(handle.await.unwrap());
    }

    assert_eq!(registry.len().await, 1);
    assert!(limiters.windows(2).all(|w| same_instance(&w[0], &w[1])));
}

#[tokio::test]
async fn presets_are_enforced() {
    let clock = Arc::new(ManualClock::at(Timestamp::from_millis(START_MS)));
    let registry = registry_at(clock.clone()).with_policies(RateLimitPolicies::default());
    let auth = registry.for_policy(PolicyKind::Auth).await.unwrap();

    for expected_remaining in (0..5).rev() {
        let result = auth.check("10.0.0.1").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, expected_remaining);
    }

    let denied = auth.check("10.0.0.1").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.reset_at.as_millis(), START_MS + 30 * 60 * 1000);
    assert_eq!(
        denied.retry_after(clock.now()),
        Duration::from_secs(30 * 60)
    );
}
