//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the load balancer from a validated configuration
//! - Run one health round before traffic is expected
//! - Start background tasks (health checks, performance reports, admin API, config reload)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::config::schema::BalancerConfig;
use crate::config::watcher::ConfigWatcher;
use crate::error::BalancerError;
use crate::health::HealthChecker;
use crate::lifecycle::Shutdown;
use crate::load_balancer::balancer::LoadBalancer;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error("failed to bind admin API on {address}: {source}")]
    AdminBind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

/// Handles to everything `start` launched.
pub struct Running {
    pub balancer: Arc<LoadBalancer>,
    pub health: Arc<HealthChecker>,
    /// Bound admin address, when the admin API is enabled.
    pub admin_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Running {
    /// Wait for background tasks to finish after shutdown was triggered.
    pub async fn join(self, deadline: Duration) {
        let all = futures_util::future::join_all(self.tasks);
        if tokio::time::timeout(deadline, all).await.is_err() {
            tracing::warn!(
                deadline_secs = deadline.as_secs(),
                "Background tasks did not stop in time"
            );
        }
    }
}

/// Build the balancer and launch its background tasks.
///
/// With `config_path`, file changes are reconciled into the running balancer.
pub async fn start(
    config: BalancerConfig,
    config_path: Option<&Path>,
    shutdown: &Shutdown,
) -> Result<Running, StartupError> {
    let balancer = Arc::new(LoadBalancer::from_config(&config)?);
    tracing::info!(
        strategy = %balancer.active_strategy(),
        backends = config.backends.len(),
        breakers = config.circuit_breaker.enabled,
        "Load balancer initialized"
    );

    let health = Arc::new(HealthChecker::new(
        balancer.registry(),
        config.health_check.clone(),
    ));
    let mut tasks = Vec::new();

    if config.health_check.enabled {
        health.check_now().await;
        tracing::info!(
            healthy = balancer.registry().healthy_count(),
            registered = balancer.registry().len(),
            "Initial health round complete"
        );
    }
    tasks.push(tokio::spawn(Arc::clone(&health).run(shutdown.subscribe())));
    tasks.push(tokio::spawn(
        Arc::clone(&balancer).run_performance_reporter(shutdown.subscribe()),
    ));

    let mut admin_addr = None;
    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(|source| StartupError::AdminBind {
                address: config.admin.bind_address.clone(),
                source,
            })?;
        admin_addr = listener.local_addr().ok();
        let state = AdminState::new(Arc::clone(&balancer), config.admin.api_key.clone());
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = admin::serve(listener, state, async move {
                let _ = rx.recv().await;
            })
            .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    let mut watcher = None;
    if let Some(path) = config_path {
        let (config_watcher, mut updates) = ConfigWatcher::new(path);
        watcher = Some(config_watcher.run()?);

        let balancer = Arc::clone(&balancer);
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(new_config) => {
                            balancer.reconcile(&new_config);
                        }
                        None => break,
                    },
                    _ = rx.recv() => break,
                }
            }
        }));
    }

    Ok(Running {
        balancer,
        health,
        admin_addr,
        tasks,
        _watcher: watcher,
    })
}
