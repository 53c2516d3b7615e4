pub mod batch;
pub mod health;

use std::sync::Arc;

use promptr_client::{ApiTransport, BatchClient, ClientConfig};
use promptr_health::{HealthMonitor, HttpHealthProbe, MonitorConfig};
use serde::Serialize;

/// Everything a command needs, built once in `main`.
pub struct Context {
    pub transport: ApiTransport,
    pub client_config: ClientConfig,
    pub monitor_config: MonitorConfig,
    pub json: bool,
}

impl Context {
    pub fn batch_client(&self) -> BatchClient {
        BatchClient::with_transport(self.transport.clone(), self.client_config.retry.clone())
    }

    /// Start a health monitor probing over the shared connection pool.
    pub fn start_monitor(&self) -> Arc<HealthMonitor> {
        let probe = HttpHealthProbe::new(self.transport.clone());
        HealthMonitor::start(self.monitor_config.clone(), Arc::new(probe))
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
