//! Health monitor service.
//!
//! [`HealthMonitor`] owns the only probe timer of the process, the circuit
//! breaker guarding the probe and the subscriber registry.  Each probe
//! runs the retry executor inside the breaker's protected call, turns the
//! outcome into a [`HealthStatus`] and publishes it to every subscriber.
//!
//! Probes never overlap: scheduled and manual checks share one probe
//! lock.  A tick that finds a probe in flight is skipped; a manual check
//! waits for it and then runs its own.
//!
//! Created once by the composition root via [`HealthMonitor::start`]; the
//! returned `Arc` is cheap to clone.  Call [`HealthMonitor::shutdown`] to
//! stop the timer.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use promptr_core::circuit_breaker::{CircuitSnapshot, CircuitState, GuardedError, SharedCircuitBreaker};
use promptr_core::retry;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::probe::{HealthProbe, ProbeError, ProbeSuccess};
use crate::status::HealthStatus;
use crate::subscriber::{HealthSubscriber, SubscriberRegistry, UnsubscribeHandle};

pub struct HealthMonitor {
    config: MonitorConfig,
    probe: Arc<dyn HealthProbe>,
    breaker: SharedCircuitBreaker,
    subscribers: Arc<SubscriberRegistry>,
    latest: watch::Sender<HealthStatus>,
    /// Held for the whole duration of a probe.
    probe_lock: tokio::sync::Mutex<()>,
    /// Restarts the timer after an out-of-band probe.
    rearm: Notify,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Build the monitor and spawn its timer task.
    ///
    /// The first scheduled probe runs after `config.initial_delay`.
    pub fn start(config: MonitorConfig, probe: Arc<dyn HealthProbe>) -> Arc<Self> {
        let breaker = SharedCircuitBreaker::new(config.breaker);
        let (latest, _) = watch::channel(HealthStatus::unknown(breaker.snapshot()));

        let monitor = Arc::new(Self {
            config,
            probe,
            breaker,
            subscribers: Arc::new(SubscriberRegistry::default()),
            latest,
            probe_lock: tokio::sync::Mutex::new(()),
            rearm: Notify::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&monitor).run_schedule());
        *monitor.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            interval_secs = monitor.config.interval.as_secs(),
            failure_threshold = monitor.config.breaker.failure_threshold(),
            "Health monitor started",
        );
        monitor
    }

    /// Register `subscriber` for every status published from now on.
    ///
    /// Statuses published before this call are not replayed; use
    /// [`current_status`](Self::current_status) for the latest one.
    pub fn subscribe<S>(&self, subscriber: S) -> UnsubscribeHandle
    where
        S: HealthSubscriber + 'static,
    {
        let id = self.subscribers.register(Arc::new(subscriber));
        tracing::debug!(subscriber_id = id, "Health subscriber registered");
        UnsubscribeHandle::new(id, &self.subscribers)
    }

    /// Latest published status (`Unknown` before the first probe).
    pub fn current_status(&self) -> HealthStatus {
        self.latest.borrow().clone()
    }

    /// Channel that always holds the latest status.
    pub fn watch(&self) -> watch::Receiver<HealthStatus> {
        self.latest.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Probe now, outside the schedule.
    ///
    /// Waits for an in-flight probe to finish first, then re-arms the timer
    /// so the next scheduled probe is a full interval away.
    pub async fn manual_check(&self) -> HealthStatus {
        tracing::info!("Manual health check requested");
        let status = {
            let _guard = self.probe_lock.lock().await;
            self.run_probe().await
        };
        self.rearm.notify_one();
        status
    }

    /// Force the breaker closed, then probe so subscribers see the result.
    pub async fn reset_circuit_breaker(&self) -> HealthStatus {
        self.breaker.reset();
        tracing::info!("Circuit breaker reset by operator");
        self.manual_check().await
    }

    /// Stop the timer and drop every subscriber.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down health monitor");
        self.cancel.cancel();

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
        }

        self.subscribers.clear();
        tracing::info!("Health monitor shut down complete");
    }

    // ---- private helpers ----

    async fn run_schedule(self: Arc<Self>) {
        let mut wait = self.config.initial_delay;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.rearm.notified() => {
                    wait = self.next_wait();
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.scheduled_probe() => {}
            }

            wait = self.next_wait();
            tracing::debug!(next_in_secs = wait.as_secs(), "Next health check scheduled");
        }

        tracing::debug!("Health monitor timer exited");
    }

    async fn scheduled_probe(&self) {
        match self.probe_lock.try_lock() {
            Ok(_guard) => {
                self.run_probe().await;
            }
            Err(_) => tracing::debug!("Health probe already in flight, skipping tick"),
        }
    }

    /// While the circuit is open there is no point probing before the
    /// cooldown has elapsed.
    fn next_wait(&self) -> Duration {
        let circuit = self.breaker.snapshot();
        if circuit.state == CircuitState::Open {
            self.config
                .interval
                .max(Duration::from_millis(circuit.next_probe_in_ms))
        } else {
            self.config.interval
        }
    }

    /// One guarded probe.  Caller holds `probe_lock`.
    async fn run_probe(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = &self.probe;
        let options = &self.config.probe_retry;

        let outcome = self
            .breaker
            .call(|| {
                retry::execute(options, move |attempt| async move {
                    probe.probe().await.map(|ping| ProbeSuccess {
                        ping,
                        attempts: attempt + 1,
                    })
                })
            })
            .await
            .map_err(|e| match e {
                GuardedError::Open(open) => ProbeError::CircuitOpen(open),
                GuardedError::Failed(failed) => ProbeError::Failed(failed),
            });

        let status = HealthStatus::from_probe(
            &outcome,
            started.elapsed(),
            self.config.degraded_latency,
            self.breaker.snapshot(),
        );
        self.publish(&status);
        status
    }

    fn publish(&self, status: &HealthStatus) {
        let previous = self.latest.borrow().status;
        if previous != status.status {
            tracing::info!(
                from = %previous,
                to = %status.status,
                response_time_ms = status.response_time_ms,
                circuit = %status.circuit.state,
                "Backend health changed",
            );
        }

        self.subscribers.publish(status);
        self.latest.send_replace(status.clone());
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("circuit", &self.breaker.snapshot())
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use promptr_client::api::{ApiError, PingResponse};
    use promptr_core::circuit_breaker::CircuitBreakerConfig;

    use super::*;

    struct Down;

    #[async_trait]
    impl HealthProbe for Down {
        async fn probe(&self) -> Result<PingResponse, ApiError> {
            Err(ApiError::Http {
                status: 503,
                body: String::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_stretches_the_schedule_to_the_cooldown() {
        let config = MonitorConfig::default()
            .with_interval(Duration::from_secs(30))
            .with_initial_delay(Duration::from_secs(3600))
            .with_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(120)).unwrap())
            .with_probe_attempts(1);
        let monitor = HealthMonitor::start(config, Arc::new(Down));

        assert_eq!(monitor.next_wait(), Duration::from_secs(30));
        monitor.manual_check().await;
        assert_eq!(monitor.next_wait(), Duration::from_secs(120));

        monitor.shutdown().await;
    }
}
