//! Rural24 Guard - Request guards for the Rural24 marketplace API
//!
//! This crate provides sliding-window rate limiting and pluggable session
//! storage (signed tokens, PostgreSQL or Redis) behind small async ports, so
//! request handlers stay independent of the infrastructure that backs them.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
