//! Registry handing out one memoized limiter per policy.
//!
//! The registry is owned by the application context. Handlers ask it for a
//! limiter by namespace and policy; the first request for a given
//! `(namespace, max, window)` builds the limiter and later requests get the
//! same instance. The backend (in-memory or Redis) is decided once when the
//! registry is built.

use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::RedisConfig;
use crate::domain::foundation::{Clock, SystemClock};
use crate::ports::{RateLimitError, RateLimiter};

use super::config::{PolicyKind, RateLimitPolicies, RateLimitPolicy};
use super::in_memory::InMemoryRateLimiter;
use super::redis::{open_connection, RedisRateLimiter};

/// Where limiter state is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackend {
    /// Per-process maps. Limits are not shared between processes.
    InMemory,
    /// A shared Redis instance, reached within `timeout`.
    Redis { url: String, timeout: Duration },
}

impl RateLimitBackend {
    /// Redis when it is enabled and has a URL, otherwise in-memory.
    pub fn from_config(redis: &RedisConfig) -> Self {
        match redis.enabled_url() {
            Some(url) => RateLimitBackend::Redis {
                url: url.to_string(),
                timeout: redis.timeout(),
            },
            None => RateLimitBackend::InMemory,
        }
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitBackend::InMemory => "memory",
            RateLimitBackend::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LimiterKey {
    namespace: String,
    max: u32,
    window_ms: u64,
}

#[derive(Clone)]
enum RegisteredLimiter {
    InMemory(Arc<InMemoryRateLimiter>),
    Redis(Arc<RedisRateLimiter>),
}

impl RegisteredLimiter {
    fn as_dyn(&self) -> Arc<dyn RateLimiter> {
        match self {
            RegisteredLimiter::InMemory(limiter) => limiter.clone(),
            RegisteredLimiter::Redis(limiter) => limiter.clone(),
        }
    }
}

/// Memoizing factory for rate limiters.
pub struct RateLimiterRegistry {
    backend: RateLimitBackend,
    policies: RateLimitPolicies,
    clock: Arc<dyn Clock>,
    limiters: Mutex<HashMap<LimiterKey, RegisteredLimiter>>,
    redis: Mutex<Option<MultiplexedConnection>>,
}

impl RateLimiterRegistry {
    /// Create a registry for the given backend with the default presets.
    pub fn new(backend: RateLimitBackend) -> Self {
        Self {
            backend,
            policies: RateLimitPolicies::default(),
            clock: Arc::new(SystemClock),
            limiters: Mutex::new(HashMap::new()),
            redis: Mutex::new(None),
        }
    }

    /// Create a registry whose backend follows the Redis settings.
    pub fn from_config(redis: &RedisConfig, policies: RateLimitPolicies) -> Self {
        Self::new(RateLimitBackend::from_config(redis)).with_policies(policies)
    }

    /// Replace the preset policies.
    pub fn with_policies(mut self, policies: RateLimitPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Replace the clock handed to every limiter built from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The backend limiters are built on.
    pub fn backend(&self) -> &RateLimitBackend {
        &self.backend
    }

    /// The preset policies.
    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    /// Returns the limiter for `(namespace, policy.max, policy.window)`,
    /// building it on first use.
    ///
    /// With the Redis backend, an unreachable server is an error. The
    /// registry never falls back to in-memory limiting on its own.
    pub async fn limiter(
        &self,
        namespace: &str,
        policy: RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        policy.validate().map_err(RateLimitError::Configuration)?;

        let key = LimiterKey {
            namespace: namespace.to_string(),
            max: policy.max,
            window_ms: policy.window_ms,
        };

        let mut limiters = self.limiters.lock().await;
        if let Some(existing) = limiters.get(&key) {
            return Ok(existing.as_dyn());
        }

        let created = match &self.backend {
            RateLimitBackend::InMemory => RegisteredLimiter::InMemory(Arc::new(
                InMemoryRateLimiter::with_clock(namespace, policy, self.clock.clone()),
            )),
            RateLimitBackend::Redis { url, timeout } => {
                let conn = self.redis_connection(url, *timeout).await?;
                RegisteredLimiter::Redis(Arc::new(
                    RedisRateLimiter::new(conn, namespace, policy).with_clock(self.clock.clone()),
                ))
            }
        };

        tracing::debug!(
            namespace,
            max = policy.max,
            window_ms = policy.window_ms,
            backend = self.backend.as_str(),
            "created rate limiter"
        );

        limiters.insert(key, created.clone());
        Ok(created.as_dyn())
    }

    /// Returns the limiter for a preset policy.
    pub async fn for_policy(&self, kind: PolicyKind) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        self.limiter(kind.namespace(), self.policies.get(kind)).await
    }

    /// Number of limiters built so far.
    pub async fn len(&self) -> usize {
        self.limiters.lock().await.len()
    }

    /// True if no limiter has been built yet.
    pub async fn is_empty(&self) -> bool {
        self.limiters.lock().await.is_empty()
    }

    /// Stops every in-memory sweeper and forgets all limiters.
    ///
    /// Intended for tests; production code keeps one registry for the
    /// lifetime of the process.
    pub async fn reset(&self) {
        let mut limiters = self.limiters.lock().await;
        for limiter in limiters.values() {
            if let RegisteredLimiter::InMemory(limiter) = limiter {
                limiter.shutdown();
            }
        }
        limiters.clear();
    }

    async fn redis_connection(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<MultiplexedConnection, RateLimitError> {
        let mut redis = self.redis.lock().await;
        if let Some(conn) = redis.as_ref() {
            return Ok(conn.clone());
        }

        let conn = open_connection(url, timeout).await.map_err(|e| {
            tracing::error!(error = %e, "rate limiter cannot reach redis");
            e
        })?;
        *redis = Some(conn.clone());
        Ok(conn)
    }
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("backend", &self.backend.as_str())
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same_instance(a: &Arc<dyn RateLimiter>, b: &Arc<dyn RateLimiter>) -> bool {
        Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
    }

    fn per_second(max: u32) -> RateLimitPolicy {
        RateLimitPolicy::new(max, Duration::from_secs(1))
    }

    #[test]
    fn backend_is_in_memory_unless_redis_enabled_with_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(RateLimitBackend::from_config(&redis), RateLimitBackend::InMemory);

        redis.url = "redis://localhost:6379".to_string();
        assert_eq!(RateLimitBackend::from_config(&redis), RateLimitBackend::InMemory);

        redis.enabled = true;
        assert_eq!(
            RateLimitBackend::from_config(&redis),
            RateLimitBackend::Redis {
                url: "redis://localhost:6379".to_string(),
                timeout: Duration::from_secs(5),
            }
        );

        redis.url.clear();
        assert_eq!(RateLimitBackend::from_config(&redis), RateLimitBackend::InMemory);
    }

    #[tokio::test]
    async fn same_triple_returns_same_instance() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);

        let a = registry.limiter("login", per_second(2)).await.unwrap();
        let b = registry.limiter("login", per_second(2)).await.unwrap();

        assert!(same_instance(&a, &b));
        a.check("ip").await.unwrap();
        let seen_by_b = b.check("ip").await.unwrap();
        assert_eq!(seen_by_b.remaining, 0);
    }

    #[tokio::test]
    async fn different_window_returns_distinct_instance() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);

        let a = registry.limiter("login", per_second(2)).await.unwrap();
        let b = registry
            .limiter("login", RateLimitPolicy::new(2, Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(!same_instance(&a, &b));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn block_duration_is_not_part_of_the_key() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);

        let a = registry.limiter("x", per_second(1)).await.unwrap();
        let b = registry
            .limiter("x", per_second(1).with_block_duration(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(same_instance(&a, &b));
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);
        let result = registry.limiter("x", per_second(0)).await;
        assert!(matches!(result, Err(RateLimitError::Configuration(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn preset_uses_configured_policy() {
        let mut policies = RateLimitPolicies::default();
        policies.auth = per_second(1);
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory).with_policies(policies);

        let auth = registry.for_policy(PolicyKind::Auth).await.unwrap();
        assert!(auth.check("ip").await.unwrap().is_allowed());
        assert!(auth.check("ip").await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn reset_forgets_limiters() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::InMemory);

        let before = registry.limiter("x", per_second(1)).await.unwrap();
        before.check("ip").await.unwrap();

        registry.reset().await;
        assert!(registry.is_empty().await);

        let after = registry.limiter("x", per_second(1)).await.unwrap();
        assert!(!same_instance(&before, &after));
        assert!(after.check("ip").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn unreachable_redis_fails_instead_of_falling_back() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::Redis {
            url: "redis://127.0.0.1:1/".to_string(),
            timeout: Duration::from_secs(1),
        });

        let result = registry.limiter("x", per_second(1)).await;
        assert!(matches!(result, Err(RateLimitError::Unavailable(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn hanging_redis_connect_gives_up_after_timeout() {
        let registry = RateLimiterRegistry::new(RateLimitBackend::Redis {
            // non-routable address: the connect attempt hangs until the timeout
            url: "redis://10.255.255.1:6379/".to_string(),
            timeout: Duration::from_millis(200),
        });

        let started = std::time::Instant::now();
        let result = registry.limiter("x", per_second(1)).await;
        assert!(matches!(result, Err(RateLimitError::Unavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
