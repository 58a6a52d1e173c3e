//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, time sources and error types
//! shared by the rate limiting and session adapters.

mod clock;
mod errors;
mod ids;
mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::ValidationError;
pub use ids::{SessionToken, UserId};
pub use timestamp::Timestamp;
