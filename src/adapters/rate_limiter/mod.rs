//! Rate limiter adapters.
//!
//! Implementations of the RateLimiter port for different backends.
//!
//! ## Available Adapters
//!
//! - `InMemoryRateLimiter` - Per-process, for development and single-server
//! - `RedisRateLimiter` - Redis-backed for multi-server deployments
//! - `RateLimiterRegistry` - Picks the backend and memoizes limiters
//!
//! ## Usage
//!
//! ```ignore
//! use rural24_guard::adapters::rate_limiter::{PolicyKind, RateLimiterRegistry};
//!
//! let registry = RateLimiterRegistry::from_config(&config.redis, config.rate_limit.clone());
//! let limiter = registry.for_policy(PolicyKind::Auth).await?;
//!
//! let result = limiter.check(client_ip).await?;
//! if result.is_denied() {
//!     // respond 429 with Retry-After derived from result.reset_at
//! }
//! ```

mod config;
mod in_memory;
mod redis;
mod registry;

pub use self::config::{PolicyKind, RateLimitPolicies, RateLimitPolicy, DEFAULT_BLOCK_DURATION};
pub use self::in_memory::{InMemoryRateLimiter, SWEEP_INTERVAL};
pub use self::redis::RedisRateLimiter;
pub use self::registry::{RateLimitBackend, RateLimiterRegistry};
