//! Redis-backed rate limiter implementation for multi-process deployments.
//!
//! Uses a sliding-window log kept in a sorted set scored by hit time, plus a
//! block marker key whose native expiry ends the block. Every process talking
//! to the same Redis shares one limit.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::foundation::{Clock, SystemClock, Timestamp};
use crate::ports::{
    DenialReason, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStats, RateLimiter,
};

use super::config::RateLimitPolicy;

/// Extra lifetime given to a hit set beyond its window, so abandoned keys
/// expire on their own.
const LEDGER_GRACE_MS: i64 = 60_000;

/// Redis-backed rate limiter for one namespace.
///
/// Per check:
/// 1. If the block marker exists, deny with its remaining TTL.
/// 2. `ZREMRANGEBYSCORE` hits older than the window, then `ZCARD` (atomic).
/// 3. At the limit: write the block marker with `PX block` and drop the set.
/// 4. Otherwise `ZADD` the hit and `PEXPIRE` the set to `window + 60s`.
///
/// Two concurrent checks at the boundary can both pass step 2, admitting one
/// extra hit. That is acceptable for throttling.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
    namespace: String,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimiter {
    /// Create a limiter on an established connection.
    pub fn new(
        conn: MultiplexedConnection,
        namespace: impl Into<String>,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect to `url` and create a limiter, failing if Redis is unreachable
    /// within `timeout`.
    pub async fn connect(
        url: &str,
        namespace: impl Into<String>,
        policy: RateLimitPolicy,
        timeout: Duration,
    ) -> Result<Self, RateLimitError> {
        let conn = open_connection(url, timeout).await?;
        Ok(Self::new(conn, namespace, policy))
    }

    /// Replace the clock used to timestamp hits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The namespace this limiter counts in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}

/// Opens a multiplexed connection and verifies it with `PING`, giving up
/// after `timeout`.
pub(crate) async fn open_connection(
    url: &str,
    timeout: Duration,
) -> Result<MultiplexedConnection, RateLimitError> {
    let client =
        redis::Client::open(url).map_err(|e| RateLimitError::Configuration(e.to_string()))?;

    let connecting = async {
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok::<_, redis::RedisError>(conn)
    };

    let conn = tokio::time::timeout(timeout, connecting)
        .await
        .map_err(|_| {
            RateLimitError::Unavailable(format!(
                "timed out connecting to redis after {}ms",
                timeout.as_millis()
            ))
        })??;
    Ok(conn)
}

/// Escapes `SCAN MATCH` glob metacharacters so `s` matches only itself.
pub(crate) fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Sorted-set member for a hit at `now_ms`.
///
/// The suffix keeps hits landing in the same millisecond distinct.
pub(crate) fn hit_member(now_ms: i64, suffix: &str) -> String {
    format!("{}-{}", now_ms, suffix)
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, identifier: &str) -> Result<RateLimitResult, RateLimitError> {
        let key = RateLimitKey::new(self.namespace.as_str(), identifier);
        let hits_key = key.to_redis_key();
        let block_key = key.to_redis_block_key();
        let now = self.clock.now_millis();
        let window = self.policy.window_ms as i64;
        let block = self.policy.block_duration_ms as i64;

        let mut conn = self.conn.clone();

        let block_ttl: i64 = conn.pttl(&block_key).await?;
        if block_ttl > 0 {
            return Ok(RateLimitResult::denied(
                DenialReason::Blocked,
                Timestamp::from_millis(now + block_ttl),
                None,
            ));
        }

        let (count,): (u32,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&hits_key)
            .arg("-inf")
            .arg(now - window)
            .ignore()
            .cmd("ZCARD")
            .arg(&hits_key)
            .query_async(&mut conn)
            .await?;

        if count >= self.policy.max {
            let until = now + block;
            redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&block_key)
                .arg(until)
                .arg("PX")
                .arg(block)
                .ignore()
                .cmd("DEL")
                .arg(&hits_key)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await?;

            tracing::warn!(
                namespace = %self.namespace,
                identifier,
                blocked_until = until,
                "rate limit exceeded, identifier blocked"
            );

            return Ok(RateLimitResult::denied(
                DenialReason::LimitExceeded,
                Timestamp::from_millis(until),
                Some(count),
            ));
        }

        let member = hit_member(now, &Uuid::new_v4().simple().to_string());
        let (oldest,): (Vec<(String, f64)>,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&hits_key)
            .arg(now)
            .arg(&member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&hits_key)
            .arg(window + LEDGER_GRACE_MS)
            .ignore()
            .cmd("ZRANGE")
            .arg(&hits_key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        let total = count + 1;
        let window_start = oldest
            .first()
            .map(|(_, score)| *score as i64)
            .unwrap_or(now);

        Ok(RateLimitResult::allowed(
            self.policy.max.saturating_sub(total),
            Timestamp::from_millis(window_start + window),
            total,
        ))
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = RateLimitKey::new(self.namespace.as_str(), identifier);
        let mut conn = self.conn.clone();

        conn.del::<_, ()>(vec![key.to_redis_key(), key.to_redis_block_key()])
            .await?;

        Ok(())
    }

    async fn stats(&self) -> Result<RateLimitStats, RateLimitError> {
        let prefix = format!("ratelimit:{}:", self.namespace);
        let pattern = format!("{}*", escape_glob(&prefix));
        let mut conn = self.conn.clone();

        let mut identifiers = HashSet::new();
        let mut blocked_keys = 0;
        {
            let mut keys: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
            while let Some(key) = keys.next_item().await {
                let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                match rest.strip_suffix(":blocked") {
                    Some(identifier) => {
                        blocked_keys += 1;
                        identifiers.insert(identifier.to_string());
                    }
                    None => {
                        identifiers.insert(rest.to_string());
                    }
                }
            }
        }

        Ok(RateLimitStats {
            total_keys: identifiers.len(),
            blocked_keys,
        })
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
