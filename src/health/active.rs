//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend over HTTP
//! - Feed probe outcomes into the per-instance state machine
//! - Log and count every transition
//!
//! Each tick spawns one detached task per backend, so a slow backend
//! delays nobody but itself. Probe errors never leave this module.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use futures_util::future::join_all;
use hyper::{Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use url::Url;

use crate::config::HealthCheckConfig;
use crate::health::state::{HealthState, HealthTransition};
use crate::load_balancer::backend::BackendInstance;
use crate::load_balancer::registry::BackendRegistry;
use crate::observability::metrics;

/// Why a probe counted as failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe url: {0}")]
    InvalidUrl(String),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Background prober that owns write access to backend health.
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthChecker {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            registry,
            config,
            client,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Probe loop. Returns when `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            path = %self.config.path,
            "Health checker starting"
        );

        let mut ticker = time::interval(self.config.interval().max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for backend in self.registry.all() {
                        let checker = Arc::clone(&self);
                        tokio::spawn(async move {
                            checker.check_backend(&backend).await;
                        });
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one full round and wait for every probe.
    pub async fn check_now(&self) {
        let backends = self.registry.all();
        join_all(backends.iter().map(|b| self.check_backend(b))).await;
    }

    /// Probe one backend and apply the outcome.
    ///
    /// Outcomes for a backend deregistered while its probe was in flight are dropped.
    pub async fn check_backend(&self, backend: &BackendInstance) -> Option<HealthTransition> {
        let outcome = self.probe(backend).await;
        if !self.is_registered(backend) {
            tracing::debug!(
                backend_id = %backend.id(),
                "Dropping probe result for removed backend"
            );
            return None;
        }
        if let Err(e) = &outcome {
            tracing::debug!(
                backend_id = %backend.id(),
                address = %backend.connection_string(),
                error = %e,
                "Health probe failed"
            );
        }

        let transition = backend.apply_probe(outcome.is_ok(), self.config.thresholds());
        metrics::record_backend_health(backend.id(), backend.is_healthy());

        if let Some(t) = transition {
            match t.to {
                HealthState::Unhealthy => tracing::warn!(
                    backend_id = %backend.id(),
                    address = %backend.connection_string(),
                    from = %t.from,
                    to = %t.to,
                    "Backend marked unhealthy"
                ),
                _ => tracing::info!(
                    backend_id = %backend.id(),
                    address = %backend.connection_string(),
                    from = %t.from,
                    to = %t.to,
                    "Backend marked healthy"
                ),
            }
            metrics::record_health_transition(backend.id(), &t.to.to_string());
        }
        transition
    }

    fn is_registered(&self, backend: &BackendInstance) -> bool {
        self.registry
            .get(backend.id())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(&current), backend))
    }

    async fn probe(&self, backend: &BackendInstance) -> Result<(), ProbeError> {
        let uri = probe_uri(backend.address(), backend.port(), &self.config.path)?;
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "backend-balancer-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let timeout = self.config.timeout();
        let response = match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProbeError::Connect(e.to_string())),
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        let status = response.status();
        let ok = match self.config.expected_status {
            Some(code) => status.as_u16() == code,
            None => status.is_success(),
        };
        if ok {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}

/// `http://address:port` joined with `path`.
pub fn probe_uri(address: &str, port: u16, path: &str) -> Result<Uri, ProbeError> {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    };
    let base = Url::parse(&format!("http://{host}:{port}"))
        .map_err(|e| ProbeError::InvalidUrl(format!("{address}:{port}: {e}")))?;
    let url = base
        .join(path)
        .map_err(|e| ProbeError::InvalidUrl(format!("{path}: {e}")))?;
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| ProbeError::InvalidUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_uri() {
        assert_eq!(
            probe_uri("10.0.0.5", 8080, "/health").unwrap().to_string(),
            "http://10.0.0.5:8080/health"
        );
        assert_eq!(
            probe_uri("::1", 9000, "/status").unwrap().to_string(),
            "http://[::1]:9000/status"
        );
        assert!(probe_uri("bad host", 80, "/health").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_ejected() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let registry = Arc::new(BackendRegistry::new());
        registry
            .insert(Arc::new(BackendInstance::new("b1", "127.0.0.1", port)))
            .unwrap();

        let checker = HealthChecker::new(
            registry.clone(),
            HealthCheckConfig {
                timeout_ms: 500,
                ..HealthCheckConfig::default()
            },
        );
        checker.check_now().await;

        let backend = registry.get("b1").unwrap();
        assert!(!backend.is_healthy());
        assert!(backend.last_health_check().is_some());
    }

    #[tokio::test]
    async fn test_removed_backend_result_is_dropped() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let registry = Arc::new(BackendRegistry::new());
        let backend = Arc::new(BackendInstance::new("b1", "127.0.0.1", port));
        registry.insert(backend.clone()).unwrap();
        registry.remove("b1");

        // Same id re-registered as a new instance
        let replacement = Arc::new(BackendInstance::new("b1", "127.0.0.1", port));
        registry.insert(replacement.clone()).unwrap();

        let checker = HealthChecker::new(registry, HealthCheckConfig::default());
        assert!(checker.check_backend(&backend).await.is_none());
        assert!(backend.is_healthy());
        assert!(backend.last_health_check().is_none());
        assert!(replacement.is_healthy());
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_panic() {
        let registry = Arc::new(BackendRegistry::new());
        let checker = Arc::new(HealthChecker::new(
            registry,
            HealthCheckConfig {
                interval_ms: 0,
                ..HealthCheckConfig::default()
            },
        ));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(checker.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
