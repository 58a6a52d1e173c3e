//! Rate limiting port for protecting the marketplace API.
//!
//! This port defines the interface for rate limiting operations using a
//! sliding-window counter with block-on-exceed. Implementations can use
//! in-memory storage for single-process deployments or Redis when several
//! API processes must share one limit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::foundation::Timestamp;

/// Port for rate limiting operations.
///
/// Each limiter instance enforces one policy within one namespace; the
/// identifier passed to `check` is typically a client IP or user id.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records a hit for `identifier` and decides whether it is allowed.
    ///
    /// While the identifier is blocked the hit is not recorded.
    async fn check(&self, identifier: &str) -> Result<RateLimitResult, RateLimitError>;

    /// Forgets all hits and any block for `identifier`.
    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError>;

    /// Returns how many identifiers are tracked and how many are blocked.
    async fn stats(&self) -> Result<RateLimitStats, RateLimitError>;
}

/// Key identifying one identifier's ledger within a namespace.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateLimitKey {
    /// Policy namespace (e.g. "auth", "search").
    pub namespace: String,
    /// Identifier within the namespace (e.g. IP address, user ID).
    pub identifier: String,
}

impl RateLimitKey {
    /// Creates a key for `identifier` within `namespace`.
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    /// Returns the key used by the in-process map.
    pub fn local_key(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }

    /// Returns the Redis key of the hit ledger (sorted set).
    pub fn to_redis_key(&self) -> String {
        format!("ratelimit:{}:{}", self.namespace, self.identifier)
    }

    /// Returns the Redis key of the block marker.
    pub fn to_redis_block_key(&self) -> String {
        format!("{}:blocked", self.to_redis_key())
    }
}

/// Why a check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// This check pushed the identifier over its limit and started a block.
    LimitExceeded,
    /// The identifier is serving a block from an earlier exceedance.
    Blocked,
}

impl DenialReason {
    /// Returns a human-readable message for the denial.
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::LimitExceeded => "Rate limit exceeded",
            DenialReason::Blocked => "Too many requests, temporarily blocked",
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Hits left in the current window (0 when denied).
    pub remaining: u32,
    /// When the window frees up again, or when the block lapses if blocked.
    pub reset_at: Timestamp,
    /// Hits counted in the current window, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u32>,
    /// Why the check was denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl RateLimitResult {
    /// Builds an allowed result.
    pub fn allowed(remaining: u32, reset_at: Timestamp, total_hits: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            total_hits: Some(total_hits),
            reason: None,
        }
    }

    /// Builds a denied result.
    pub fn denied(reason: DenialReason, reset_at: Timestamp, total_hits: Option<u32>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            total_hits,
            reason: Some(reason),
        }
    }

    /// Returns true if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Returns true if the request was denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Time until `reset_at`, measured from `now` (zero if already past).
    pub fn retry_after(&self, now: Timestamp) -> Duration {
        let millis = self.reset_at.as_millis() - now.as_millis();
        Duration::from_millis(millis.max(0) as u64)
    }
}

/// Point-in-time counters for a limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    /// Identifiers currently tracked.
    pub total_keys: usize,
    /// Identifiers currently serving a block.
    pub blocked_keys: usize,
}

/// Errors that can occur during rate limiting operations.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Rate limiter backend is unavailable.
    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),

    /// The limiter could not be constructed from the given settings.
    #[error("invalid rate limiter configuration: {0}")]
    Configuration(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Unavailable(err.to_string())
    }
}
