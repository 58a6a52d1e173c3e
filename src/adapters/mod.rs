//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the request guards to their backing stores:
//! - `rate_limiter` - In-memory and Redis sliding-window limiters
//! - `session` - JWT, PostgreSQL and Redis session stores

pub mod rate_limiter;
pub mod session;

pub use rate_limiter::{
    InMemoryRateLimiter, PolicyKind, RateLimitBackend, RateLimitPolicies, RateLimitPolicy,
    RateLimiterRegistry, RedisRateLimiter,
};
pub use session::{JwtSessionStore, PostgresSessionStore, RedisSessionStore, SessionRegistry};
