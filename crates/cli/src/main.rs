//! `promptr` -- command-line client for the prompt-automation backend.
//!
//! Submits prompt batches, follows their progress and reports backend
//! health.  Logs go to stderr; results go to stdout.
//!
//! # Environment variables
//!
//! | Variable                         | Default                 | Description                       |
//! |----------------------------------|-------------------------|-----------------------------------|
//! | `PROMPTR_BASE_URL`               | `http://localhost:5000` | Backend base URL                  |
//! | `PROMPTR_REQUEST_TIMEOUT_SECS`   | `30`                    | Per-request timeout               |
//! | `PROMPTR_READ_MAX_ATTEMPTS`      | `4`                     | Retry budget for reads            |
//! | `PROMPTR_WRITE_MAX_ATTEMPTS`     | `2`                     | Retry budget for create/run/stop  |
//! | `PROMPTR_RETRY_INITIAL_DELAY_MS` | `500`                   | First retry delay                 |
//! | `HEALTH_*`                       | see `MonitorConfig`     | Health monitor settings           |
//! | `RUST_LOG`                       | `promptr=info`          | Log filter                        |

mod cli;
mod commands;
mod prompts;

use clap::Parser;
use promptr_client::{ApiTransport, ClientConfig};
use promptr_health::MonitorConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::commands::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut client_config = ClientConfig::from_env();
    if let Some(base_url) = cli.base_url {
        client_config.base_url = base_url;
    }
    tracing::debug!(base_url = %client_config.base_url, "Using backend");

    let transport = ApiTransport::new(client_config.base_url.clone(), client_config.request_timeout)?;
    let ctx = Context {
        transport,
        client_config,
        monitor_config: MonitorConfig::from_env(),
        json: cli.json,
    };

    match cli.command {
        Command::Batch(command) => commands::batch::run(&ctx, command).await,
        Command::Health(command) => commands::health::run(&ctx, command).await,
    }
}
