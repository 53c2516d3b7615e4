use promptr_health::{ChannelSubscriber, HealthMonitor, HealthState, HealthStatus, UnsubscribeHandle};
use tokio::sync::mpsc;

use super::{print_json, Context};
use crate::cli::HealthCommand;

pub async fn run(ctx: &Context, command: HealthCommand) -> anyhow::Result<()> {
    let monitor = ctx.start_monitor();

    let result = match command {
        HealthCommand::Check => {
            let status = monitor.manual_check().await;
            show(ctx, &status).and_then(|()| ensure_reachable(&status))
        }
        HealthCommand::Reset => {
            let status = monitor.reset_circuit_breaker().await;
            show(ctx, &status)
        }
        HealthCommand::Watch => {
            let (first, _subscription, mut updates) = follow(&monitor).await;
            show(ctx, &first)?;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break Ok(()),
                    update = updates.recv() => match update {
                        Some(status) => show(ctx, &status)?,
                        None => break Ok(()),
                    },
                }
            }
        }
    };

    monitor.shutdown().await;
    result
}

/// Check now, then subscribe for the statuses that follow.
///
/// The immediate result is returned rather than delivered on the channel,
/// so it is shown exactly once.
async fn follow(
    monitor: &HealthMonitor,
) -> (HealthStatus, UnsubscribeHandle, mpsc::Receiver<HealthStatus>) {
    let first = monitor.manual_check().await;
    let (subscriber, updates) = ChannelSubscriber::channel(16);
    let subscription = monitor.subscribe(subscriber);
    (first, subscription, updates)
}

fn show(ctx: &Context, status: &HealthStatus) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(status);
    }
    println!(
        "{}  {:<9}  {:>6}ms  {}  circuit={} ({}/{} failures)",
        status.last_checked.format("%Y-%m-%d %H:%M:%S"),
        status.status.to_string(),
        status.response_time_ms,
        status.uptime_description,
        status.circuit.state,
        status.circuit.failure_count,
        status.circuit.failure_threshold,
    );
    if let Some(error) = &status.error {
        println!("  {error}");
    }
    Ok(())
}

fn ensure_reachable(status: &HealthStatus) -> anyhow::Result<()> {
    if status.status == HealthState::Unhealthy {
        anyhow::bail!(
            "backend unhealthy: {}",
            status.error.as_deref().unwrap_or(&status.uptime_description)
        );
    }
    Ok(())
}
