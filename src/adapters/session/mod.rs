//! Session store adapters.
//!
//! - [`JwtSessionStore`] - stateless signed tokens, not revocable
//! - [`PostgresSessionStore`] - rows in `user_sessions`
//! - [`RedisSessionStore`] - values with native TTL plus a per-user index
//!
//! [`SessionRegistry`] picks one from configuration and keeps it for the
//! lifetime of the process.

mod jwt;
mod postgres;
mod redis;
mod registry;

pub use self::jwt::{JwtSessionStore, DEFAULT_AUDIENCE, DEFAULT_ISSUER};
pub use self::postgres::PostgresSessionStore;
pub use self::redis::RedisSessionStore;
pub use self::registry::SessionRegistry;
