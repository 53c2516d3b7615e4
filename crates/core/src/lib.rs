//! Failure-handling primitives shared by the promptr client crates.
//!
//! Pure logic with no HTTP dependency: a retry-with-backoff executor and
//! a three-state circuit breaker, plus the common error, type aliases
//! and environment helpers.

pub mod circuit_breaker;
pub mod env;
pub mod error;
pub mod retry;
pub mod types;
