//! Health monitor scheduling, fan-out and breaker integration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use promptr_client::api::{ApiError, PingResponse};
use promptr_core::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use promptr_health::{ChannelSubscriber, HealthMonitor, HealthProbe, HealthState, HealthStatus, MonitorConfig};

// ---------------------------------------------------------------------------
// Scripted probe
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Step {
    Up { latency_ms: u64 },
    Down,
}

/// Replays `steps` front to back; the last step repeats.
struct ScriptedProbe {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    /// Simulated time each probe takes.
    duration: Duration,
}

impl ScriptedProbe {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::slow(steps, Duration::ZERO)
    }

    fn slow(steps: Vec<Step>, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            duration,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, step: Step) {
        let mut steps = self.steps.lock().unwrap();
        steps.clear();
        steps.push_back(step);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> Result<PingResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }

        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                *steps.front().unwrap()
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Up { latency_ms } => Ok(PingResponse {
                status: 200,
                latency: Duration::from_millis(latency_ms),
            }),
            Step::Down => Err(ApiError::Http {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }
}

/// No scheduled probe within the test unless it asks for one.
fn manual_only(threshold: u32) -> MonitorConfig {
    MonitorConfig::default()
        .with_initial_delay(Duration::from_secs(24 * 3600))
        .with_interval(Duration::from_secs(24 * 3600))
        .with_breaker(CircuitBreakerConfig::new(threshold, Duration::from_secs(60)).unwrap())
        .with_probe_attempts(1)
}

fn recorder() -> (Arc<Mutex<Vec<HealthState>>>, impl Fn(&HealthStatus) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |status: &HealthStatus| sink.lock().unwrap().push(status.status))
}

// ---------------------------------------------------------------------------
// Circuit breaker integration
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sixth_probe_after_five_failures_is_rejected_without_network_call() {
    let probe = ScriptedProbe::new(vec![Step::Down]);
    let monitor = HealthMonitor::start(manual_only(5), probe.clone());

    for _ in 0..5 {
        let status = monitor.manual_check().await;
        assert_eq!(status.status, HealthState::Unhealthy);
    }
    assert_eq!(probe.calls(), 5);
    assert_eq!(monitor.circuit_snapshot().state, CircuitState::Open);

    let status = monitor.manual_check().await;
    assert_eq!(probe.calls(), 5);
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.uptime_description, "Circuit open");
    assert!(!status.is_connected);
    assert!(status.error.as_deref().unwrap_or_default().contains("circuit open"));

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retries_inside_one_probe_count_as_a_single_breaker_failure() {
    let probe = ScriptedProbe::new(vec![Step::Down]);
    let monitor = HealthMonitor::start(manual_only(2).with_probe_attempts(3), probe.clone());

    monitor.manual_check().await;
    assert_eq!(probe.calls(), 3);
    let circuit = monitor.circuit_snapshot();
    assert_eq!(circuit.state, CircuitState::Closed);
    assert_eq!(circuit.failure_count, 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn blip_recovered_by_retry_is_degraded() {
    let probe = ScriptedProbe::new(vec![Step::Down, Step::Up { latency_ms: 30 }]);
    let monitor = HealthMonitor::start(manual_only(5).with_probe_attempts(2), probe.clone());

    let status = monitor.manual_check().await;
    assert_eq!(status.status, HealthState::Degraded);
    assert!(status.is_connected);
    assert_eq!(status.circuit.failure_count, 0);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_closes_the_circuit_and_publishes_a_fresh_probe() {
    let probe = ScriptedProbe::new(vec![Step::Down]);
    let monitor = HealthMonitor::start(manual_only(2), probe.clone());
    monitor.manual_check().await;
    monitor.manual_check().await;
    assert_eq!(monitor.circuit_snapshot().state, CircuitState::Open);

    let (log, subscriber) = recorder();
    let _handle = monitor.subscribe(subscriber);
    probe.set(Step::Up { latency_ms: 20 });

    let status = monitor.reset_circuit_breaker().await;
    assert_eq!(status.status, HealthState::Healthy);
    assert_eq!(status.circuit.state, CircuitState::Closed);
    assert_eq!(status.circuit.failure_count, 0);
    assert_eq!(*log.lock().unwrap(), [HealthState::Healthy]);
    assert_eq!(monitor.current_status(), status);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_while_still_down_yields_closed_with_one_failure() {
    let probe = ScriptedProbe::new(vec![Step::Down]);
    let monitor = HealthMonitor::start(manual_only(3), probe.clone());
    for _ in 0..3 {
        monitor.manual_check().await;
    }

    let status = monitor.reset_circuit_breaker().await;
    assert_eq!(status.status, HealthState::Unhealthy);
    assert_eq!(status.circuit.state, CircuitState::Closed);
    assert_eq!(status.circuit.failure_count, 1);
    assert_eq!(probe.calls(), 4);

    monitor.shutdown().await;
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn subscriber_sees_only_statuses_published_after_subscribing() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let monitor = HealthMonitor::start(manual_only(5), probe);
    monitor.manual_check().await;

    let (log, subscriber) = recorder();
    let handle = monitor.subscribe(subscriber);
    assert!(log.lock().unwrap().is_empty());

    monitor.manual_check().await;
    monitor.manual_check().await;
    assert_eq!(log.lock().unwrap().len(), 2);

    assert!(handle.unsubscribe());
    monitor.manual_check().await;
    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(monitor.subscriber_count(), 0);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribers_are_notified_in_registration_order() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let monitor = HealthMonitor::start(manual_only(5), probe);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for label in ["a", "b", "c"] {
        let order = Arc::clone(&order);
        handles.push(monitor.subscribe(move |_: &HealthStatus| order.lock().unwrap().push(label)));
    }

    monitor.manual_check().await;
    assert_eq!(*order.lock().unwrap(), ["a", "b", "c"]);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_subscribers_and_stops_the_timer() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let config = MonitorConfig::default()
        .with_initial_delay(Duration::from_secs(3))
        .with_interval(Duration::from_secs(30));
    let monitor = HealthMonitor::start(config, probe.clone());
    let (subscriber, _rx) = ChannelSubscriber::channel(8);
    let _handle = monitor.subscribe(subscriber);

    monitor.shutdown().await;
    assert_eq!(monitor.subscriber_count(), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(probe.calls(), 0);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timer_probes_after_initial_delay_then_every_interval() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let config = MonitorConfig::default()
        .with_initial_delay(Duration::from_secs(3))
        .with_interval(Duration::from_secs(30));
    let start = tokio::time::Instant::now();
    let monitor = HealthMonitor::start(config, probe.clone());
    let (subscriber, mut rx) = ChannelSubscriber::channel(8);
    let _handle = monitor.subscribe(subscriber);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.status, HealthState::Healthy);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(start.elapsed() < Duration::from_secs(4));

    rx.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(33));
    assert!(start.elapsed() < Duration::from_secs(34));
    assert_eq!(probe.calls(), 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_check_rearms_the_timer() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let config = MonitorConfig::default()
        .with_initial_delay(Duration::from_secs(30))
        .with_interval(Duration::from_secs(30));
    let start = tokio::time::Instant::now();
    let monitor = HealthMonitor::start(config, probe.clone());

    tokio::time::sleep(Duration::from_secs(20)).await;
    monitor.manual_check().await;

    let mut rx = monitor.watch();
    rx.changed().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(50));
    assert!(start.elapsed() < Duration::from_secs(51));
    assert_eq!(probe.calls(), 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_checks_never_overlap() {
    let probe = ScriptedProbe::slow(vec![Step::Up { latency_ms: 10 }], Duration::from_millis(500));
    let monitor = HealthMonitor::start(manual_only(5), probe.clone());

    let a = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.manual_check().await }
    });
    let b = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.manual_check().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(probe.calls(), 2);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn current_status_is_unknown_before_the_first_probe() {
    let probe = ScriptedProbe::new(vec![Step::Up { latency_ms: 10 }]);
    let monitor = HealthMonitor::start(manual_only(5), probe);

    let status = monitor.current_status();
    assert_eq!(status.status, HealthState::Unknown);
    assert_eq!(status.uptime_description, "Not checked");

    monitor.shutdown().await;
}
