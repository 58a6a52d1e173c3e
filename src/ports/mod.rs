//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! request handlers and the infrastructure behind them. Adapters implement
//! these ports.
//!
//! ## Request Guard Ports
//!
//! - `RateLimiter` - Sliding-window throttling per namespace and identifier
//! - `SessionStore` - Issuing, resolving and revoking session tokens

mod rate_limiter;
mod session_store;

pub use rate_limiter::{
    DenialReason, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStats, RateLimiter,
};
pub use session_store::{
    ActiveSession, SessionAttributes, SessionData, SessionError, SessionPatch, SessionStore,
    SessionStrategy,
};
