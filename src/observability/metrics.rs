//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_selections_total` (counter): selections by strategy, backend
//! - `lb_no_backend_total` (counter): selections that found nothing healthy
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `lb_health_transitions_total` (counter): health flips by backend, target state
//! - `lb_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `lb_circuit_rejections_total` (counter): calls refused by an open breaker
//! - `lb_request_duration_seconds` (histogram): guarded call latency by backend
//! - `lb_requests_failed_total` (counter): failed guarded calls by backend
//! - `lb_bottlenecks_total` (counter): detections by component, metric, severity

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_selection(strategy: &'static str, backend: &str) {
    counter!("lb_selections_total", "strategy" => strategy, "backend" => backend.to_string())
        .increment(1);
}

pub fn record_no_backend(strategy: &'static str) {
    counter!("lb_no_backend_total", "strategy" => strategy).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_transition(backend: &str, to: &str) {
    counter!(
        "lb_health_transitions_total",
        "backend" => backend.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_circuit_state(dependency: &str, state: CircuitState) {
    gauge!("lb_circuit_state", "dependency" => dependency.to_string()).set(state as u8 as f64);
}

pub fn record_circuit_rejection(dependency: &str) {
    counter!("lb_circuit_rejections_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_request(backend: &str, duration: Duration, success: bool) {
    histogram!("lb_request_duration_seconds", "backend" => backend.to_string())
        .record(duration.as_secs_f64());
    if !success {
        counter!("lb_requests_failed_total", "backend" => backend.to_string()).increment(1);
    }
}

pub fn record_bottleneck(component: &str, metric: &str, severity: &'static str) {
    counter!(
        "lb_bottlenecks_total",
        "component" => component.to_string(),
        "metric" => metric.to_string(),
        "severity" => severity
    )
    .increment(1);
}
