//! Domain layer - value objects shared by every adapter.
//!
//! The guards carry no business rules of their own; the domain layer only
//! provides the vocabulary (identifiers, timestamps, clocks) the ports speak.

pub mod foundation;
