//! HTTP health probe against a mock backend.

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use promptr_client::api::ApiTransport;
use promptr_health::{HealthMonitor, HealthProbe, HealthState, HttpHealthProbe, MonitorConfig};
use serde_json::json;

async fn spawn_server(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("read test listener addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), handle)
}

fn probe_for(base_url: &str) -> HttpHealthProbe {
    HttpHealthProbe::new(ApiTransport::new(base_url, Duration::from_secs(5)).unwrap())
}

#[tokio::test]
async fn healthy_backend_reports_status_and_latency() {
    let app = Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) }));
    let (base_url, server) = spawn_server(app).await;

    let ping = probe_for(&base_url).probe().await.unwrap();
    server.abort();

    assert_eq!(ping.status, 200);
    assert!(ping.latency < Duration::from_secs(5));
}

#[tokio::test]
async fn server_error_is_a_probe_failure() {
    let app = Router::new().route("/health", get(|| async { StatusCode::BAD_GATEWAY }));
    let (base_url, server) = spawn_server(app).await;

    let err = probe_for(&base_url).probe().await.unwrap_err();
    server.abort();

    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn missing_health_route_is_reachable_but_degraded() {
    let (base_url, server) = spawn_server(Router::new()).await;
    let config = MonitorConfig::default()
        .with_initial_delay(Duration::from_secs(3600))
        .with_probe_attempts(1);
    let monitor = HealthMonitor::start(config, std::sync::Arc::new(probe_for(&base_url)));

    let status = monitor.manual_check().await;
    monitor.shutdown().await;
    server.abort();

    assert_eq!(status.status, HealthState::Degraded);
    assert!(status.is_connected);
}

#[tokio::test]
async fn custom_path_is_probed() {
    let app = Router::new().route("/api/health", get(|| async { "ok" }));
    let (base_url, server) = spawn_server(app).await;

    let ping = probe_for(&base_url)
        .with_path("/api/health")
        .probe()
        .await
        .unwrap();
    server.abort();

    assert_eq!(ping.status, 200);
}
