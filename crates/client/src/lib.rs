//! HTTP client library for the prompt-automation batch backend.
//!
//! Provides the transport layer, typed batch-job models with entity
//! validation, per-operation retry policies, status-transition tracking
//! and a polling helper for following a batch until it finishes.

pub mod api;
pub mod batch;
pub mod config;
pub mod models;
pub mod tracker;
pub mod watch;

pub use api::{ApiError, ApiTransport};
pub use batch::{BatchClient, BatchClientError, Operation};
pub use config::{ClientConfig, RetryPolicy};
pub use models::{BatchJob, BatchStatus, Progress, Task};
