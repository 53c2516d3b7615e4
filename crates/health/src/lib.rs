//! Backend health monitoring.
//!
//! [`HealthMonitor`](monitor::HealthMonitor) owns one recurring probe
//! timer, a circuit breaker guarding the probe and an ordered registry of
//! subscribers that receive every published [`HealthStatus`](status::HealthStatus).

pub mod config;
pub mod monitor;
pub mod probe;
pub mod status;
pub mod subscriber;

pub use config::MonitorConfig;
pub use monitor::HealthMonitor;
pub use probe::{HealthProbe, HttpHealthProbe, ProbeError};
pub use status::{HealthState, HealthStatus};
pub use subscriber::{ChannelSubscriber, HealthSubscriber, UnsubscribeHandle};
