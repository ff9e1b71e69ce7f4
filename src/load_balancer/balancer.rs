//! Load balancer facade.
//!
//! # Responsibilities
//! - Own the registry, all five strategies and the per-backend breakers
//! - Switch the active strategy at runtime
//! - Hand out leases and run guarded calls against the selected backend
//! - Feed latency and throughput trackers, and report bottlenecks
//!
//! Every strategy sees every registered backend, so switching strategies
//! never loses membership.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::{BalancerConfig, PerformanceConfig};
use crate::error::{BalancerError, CallError};
use crate::load_balancer::backend::{BackendInstance, BackendLease, BackendSnapshot};
use crate::load_balancer::registry::BackendRegistry;
use crate::load_balancer::{InstanceSelector, SelectionContext, Strategy, StrategyKind};
use crate::observability::metrics;
use crate::performance::{
    Bottleneck, BottleneckDetector, PerformanceSnapshot, ResponseTimeTracker, ThroughputTracker,
};
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitSnapshot,
};

/// Bottleneck component for balancer-wide metrics.
pub const BALANCER_COMPONENT: &str = "load_balancer";

/// Membership changes made by [`LoadBalancer::reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub strategy_changed: bool,
}

/// Entry point for callers that need a backend.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: Arc<BackendRegistry>,
    /// Indexed by `StrategyKind as usize`.
    strategies: Vec<Strategy>,
    active: ArcSwap<StrategyKind>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    /// Serializes add/remove so the registry, strategies and breakers agree.
    membership: Mutex<()>,
    breaker_config: Option<CircuitBreakerConfig>,
    performance: PerformanceConfig,
    response_times: ResponseTimeTracker,
    throughput: ThroughputTracker,
    bottlenecks: BottleneckDetector,
}

impl LoadBalancer {
    /// A balancer with default breaker and performance settings.
    pub fn new(strategy: StrategyKind) -> Self {
        Self::with_settings(
            strategy,
            Some(CircuitBreakerConfig::default()),
            PerformanceConfig::default(),
        )
    }

    /// `breaker_config = None` disables per-backend breakers.
    pub fn with_settings(
        strategy: StrategyKind,
        breaker_config: Option<CircuitBreakerConfig>,
        performance: PerformanceConfig,
    ) -> Self {
        let bottlenecks = BottleneckDetector::new();
        bottlenecks.set_threshold(
            BALANCER_COMPONENT,
            "p95_latency_ms",
            performance.p95_latency_threshold_ms as f64,
        );
        bottlenecks.set_threshold(
            BALANCER_COMPONENT,
            "requests_per_second",
            performance.rps_threshold,
        );

        Self {
            registry: Arc::new(BackendRegistry::new()),
            strategies: StrategyKind::ALL.into_iter().map(Strategy::new).collect(),
            active: ArcSwap::from_pointee(strategy),
            breakers: DashMap::new(),
            membership: Mutex::new(()),
            breaker_config,
            response_times: ResponseTimeTracker::new(performance.latency_capacity),
            throughput: ThroughputTracker::new(),
            bottlenecks,
            performance,
        }
    }

    /// Build a balancer and register every configured backend.
    pub fn from_config(config: &BalancerConfig) -> Result<Self, BalancerError> {
        let breaker_config = config
            .circuit_breaker
            .enabled
            .then(|| config.circuit_breaker.breaker_config());
        let lb = Self::with_settings(config.strategy, breaker_config, config.performance.clone());
        for backend in &config.backends {
            lb.add_server(backend.to_instance())?;
        }
        Ok(lb)
    }

    /// Shared registry, for the health checker.
    pub fn registry(&self) -> Arc<BackendRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn active_strategy(&self) -> StrategyKind {
        **self.active.load()
    }

    /// Switch the strategy used by subsequent selections.
    pub fn set_strategy(&self, kind: StrategyKind) {
        let previous = self.active.swap(Arc::new(kind));
        if *previous != kind {
            tracing::info!(from = %previous, to = %kind, "Load balancing strategy switched");
        }
    }

    pub fn strategy(&self, kind: StrategyKind) -> &Strategy {
        &self.strategies[kind as usize]
    }

    /// Register a backend with the registry, every strategy and a new breaker.
    pub fn add_server(
        &self,
        instance: BackendInstance,
    ) -> Result<Arc<BackendInstance>, BalancerError> {
        if instance.address().trim().is_empty() || instance.port() == 0 {
            return Err(BalancerError::InvalidAddress(instance.connection_string()));
        }

        let instance = Arc::new(instance);
        let _membership = self.membership.lock();
        self.registry.insert(Arc::clone(&instance))?;
        // Breaker first: a selectable backend always has one
        if let Some(config) = &self.breaker_config {
            self.breakers.insert(
                instance.id().to_string(),
                Arc::new(CircuitBreaker::new(instance.id(), config.clone())),
            );
        }
        self.bottlenecks.set_threshold(
            instance.id(),
            "failure_ratio",
            self.performance.failure_ratio_threshold,
        );
        for strategy in &self.strategies {
            strategy.add_server(Arc::clone(&instance));
        }

        tracing::info!(
            backend_id = %instance.id(),
            address = %instance.connection_string(),
            weight = instance.weight(),
            region = instance.region().unwrap_or("-"),
            "Backend added"
        );
        Ok(instance)
    }

    /// Deregister a backend everywhere. In-flight leases stay valid.
    pub fn remove_server(&self, id: &str) -> Result<Arc<BackendInstance>, BalancerError> {
        let _membership = self.membership.lock();
        let instance = self
            .registry
            .remove(id)
            .ok_or_else(|| BalancerError::UnknownBackend(id.to_string()))?;
        for strategy in &self.strategies {
            strategy.remove_server(id);
        }
        self.breakers.remove(id);
        self.bottlenecks.set_threshold(id, "failure_ratio", 0.0);

        tracing::info!(
            backend_id = %id,
            address = %instance.connection_string(),
            "Backend removed"
        );
        Ok(instance)
    }

    /// Select a backend with the active strategy.
    pub fn acquire(&self, ctx: &SelectionContext) -> Result<BackendLease, BalancerError> {
        let kind = self.active_strategy();
        match self.strategy(kind).select(ctx) {
            Some(backend) => {
                metrics::record_selection(kind.as_str(), backend.id());
                tracing::debug!(strategy = %kind, backend_id = %backend.id(), "Backend selected");
                Ok(BackendLease::new(backend))
            }
            None => {
                metrics::record_no_backend(kind.as_str());
                tracing::warn!(
                    strategy = %kind,
                    registered = self.registry.len(),
                    "No healthy backend available"
                );
                Err(BalancerError::NoHealthyBackend {
                    strategy: kind.as_str(),
                })
            }
        }
    }

    /// Select a backend and run `f` against it through its breaker.
    ///
    /// The error from `f` comes back unchanged inside `CallError::Circuit`.
    pub async fn call<F, Fut, T, E>(&self, ctx: &SelectionContext, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce(Arc<BackendInstance>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lease = self.acquire(ctx).map_err(CallError::Unavailable)?;
        let instance = Arc::clone(lease.instance());
        let breaker = self.breaker(instance.id());

        let started = Instant::now();
        let target = Arc::clone(&instance);
        let result = match breaker {
            Some(breaker) => breaker.call(move || f(target)).await,
            None => f(target).await.map_err(CircuitError::Inner),
        };

        match &result {
            Ok(_) => self.record_outcome(&lease, started.elapsed(), true),
            Err(CircuitError::Inner(_)) => self.record_outcome(&lease, started.elapsed(), false),
            Err(CircuitError::Open { .. }) => {}
        }
        result.map_err(CallError::Circuit)
    }

    fn record_outcome(&self, lease: &BackendLease, latency: Duration, success: bool) {
        lease.instance().record_latency(latency);
        if !success {
            lease.record_failure();
        }
        self.response_times.record(latency);
        self.throughput.record();
        metrics::record_request(lease.id(), latency, success);
    }

    /// The breaker guarding `id`, if breakers are enabled.
    pub fn breaker(&self, id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(id).map(|b| Arc::clone(b.value()))
    }

    /// Per-backend statistics, sorted by id.
    pub fn server_stats(&self) -> Vec<BackendSnapshot> {
        self.registry.all().iter().map(|b| b.snapshot()).collect()
    }

    /// Breaker snapshots, sorted by backend id.
    pub fn breaker_states(&self) -> Vec<CircuitSnapshot> {
        let mut states: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        states.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        states
    }

    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        let ps = self.response_times.percentiles(&[50.0, 95.0, 99.0]);
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        PerformanceSnapshot {
            samples: self.response_times.len(),
            average_ms: ms(self.response_times.average()),
            p50_ms: ms(ps[0]),
            p95_ms: ms(ps[1]),
            p99_ms: ms(ps[2]),
            requests_per_second: self.throughput.requests_per_second(),
        }
    }

    pub fn bottlenecks(&self) -> &BottleneckDetector {
        &self.bottlenecks
    }

    /// Log a snapshot and check it against the bottleneck thresholds.
    pub fn report_performance(&self) -> Vec<Bottleneck> {
        let snapshot = self.performance_snapshot();
        tracing::info!(
            samples = snapshot.samples,
            average_ms = snapshot.average_ms,
            p50_ms = snapshot.p50_ms,
            p95_ms = snapshot.p95_ms,
            p99_ms = snapshot.p99_ms,
            requests_per_second = snapshot.requests_per_second,
            healthy = self.registry.healthy_count(),
            registered = self.registry.len(),
            "Performance report"
        );

        let mut found = Vec::new();
        if snapshot.samples > 0 {
            found.extend(self.bottlenecks.evaluate(
                BALANCER_COMPONENT,
                "p95_latency_ms",
                snapshot.p95_ms,
            ));
        }
        found.extend(self.bottlenecks.evaluate(
            BALANCER_COMPONENT,
            "requests_per_second",
            snapshot.requests_per_second,
        ));
        for backend in self.registry.all() {
            let total = backend.total_requests();
            if total == 0 {
                continue;
            }
            let ratio = backend.failed_requests() as f64 / total as f64;
            found.extend(self.bottlenecks.evaluate(backend.id(), "failure_ratio", ratio));
        }
        found
    }

    /// Periodic performance report. Returns when `shutdown` fires.
    pub async fn run_performance_reporter(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let period = Duration::from_secs(self.performance.report_interval_secs.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_performance();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Performance reporter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Bring membership and strategy in line with a reloaded config.
    ///
    /// Backends without an id are matched to a registered backend at the
    /// same address and port. Changed backends are re-registered.
    pub fn reconcile(&self, config: &BalancerConfig) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let current = self.registry.all();
        let mut desired: Vec<(String, BackendInstance)> = Vec::with_capacity(config.backends.len());

        for backend in &config.backends {
            let id = match &backend.id {
                Some(id) => id.clone(),
                None => current
                    .iter()
                    .find(|b| {
                        b.address() == backend.address
                            && b.port() == backend.port
                            && !desired.iter().any(|(id, _)| id == b.id())
                    })
                    .map(|b| b.id().to_string())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            };
            desired.push((id.clone(), backend.to_instance_with_id(id)));
        }

        for existing in &current {
            let wanted = desired.iter().find(|(id, _)| id == existing.id());
            let keep = wanted.is_some_and(|(_, candidate)| same_definition(existing, candidate));
            if !keep && self.remove_server(existing.id()).is_ok() {
                report.removed.push(existing.id().to_string());
            }
        }

        for (id, candidate) in desired {
            if self.registry.contains(&id) {
                continue;
            }
            match self.add_server(candidate) {
                Ok(_) => report.added.push(id),
                Err(e) => tracing::warn!(backend_id = %id, error = %e, "Skipping backend on reload"),
            }
        }

        if self.active_strategy() != config.strategy {
            self.set_strategy(config.strategy);
            report.strategy_changed = true;
        }

        tracing::info!(
            added = report.added.len(),
            removed = report.removed.len(),
            strategy = %self.active_strategy(),
            "Configuration reconciled"
        );
        report
    }
}

fn same_definition(a: &BackendInstance, b: &BackendInstance) -> bool {
    a.address() == b.address()
        && a.port() == b.port()
        && a.weight() == b.weight()
        && a.metadata() == b.metadata()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;
    use crate::health::state::HealthThresholds;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn backend(id: &str, port: u16) -> BackendInstance {
        BackendInstance::new(id, "127.0.0.1", port)
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }

    #[test]
    fn test_add_registers_everywhere() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        lb.add_server(backend("b1", 8080)).unwrap();

        for kind in StrategyKind::ALL {
            assert_eq!(lb.strategy(kind).len(), 1, "{kind}");
        }
        assert!(lb.breaker("b1").is_some());

        let err = lb.add_server(backend("b1", 9090)).unwrap_err();
        assert_eq!(err, BalancerError::DuplicateBackend("b1".into()));

        let err = lb.add_server(backend("b2", 0)).unwrap_err();
        assert!(matches!(err, BalancerError::InvalidAddress(_)));
    }

    #[test]
    fn test_remove_deregisters_everywhere() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        lb.add_server(backend("b1", 8080)).unwrap();
        lb.remove_server("b1").unwrap();

        for kind in StrategyKind::ALL {
            assert!(lb.strategy(kind).is_empty());
        }
        assert!(lb.breaker("b1").is_none());
        assert_eq!(
            lb.remove_server("b1").unwrap_err(),
            BalancerError::UnknownBackend("b1".into())
        );
    }

    #[test]
    fn test_acquire_without_healthy_backend() {
        let lb = LoadBalancer::new(StrategyKind::WeightedRoundRobin);
        let err = lb.acquire(&SelectionContext::new()).unwrap_err();
        assert_eq!(
            err,
            BalancerError::NoHealthyBackend {
                strategy: "weighted_round_robin"
            }
        );

        let b1 = lb.add_server(backend("b1", 8080)).unwrap();
        b1.apply_probe(false, HealthThresholds::default());
        assert!(lb.acquire(&SelectionContext::new()).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_lease_drop_releases_connection() {
        let lb = LoadBalancer::new(StrategyKind::LeastConnections);
        let b1 = lb.add_server(backend("b1", 8080)).unwrap();

        let lease = lb.acquire(&SelectionContext::new()).unwrap();
        assert_eq!(lease.id(), "b1");
        assert_eq!(b1.active_connections(), 1);
        drop(lease);
        assert_eq!(b1.active_connections(), 0);
        assert_eq!(b1.total_requests(), 1);
    }

    #[test]
    fn test_set_strategy_switches_selection() {
        let lb = LoadBalancer::new(StrategyKind::LeastConnections);
        lb.add_server(backend("b1", 8080)).unwrap();
        lb.add_server(backend("b2", 8081)).unwrap();
        let ctx = SelectionContext::new();

        // Held leases steer least-connections to b2
        let first = lb.acquire(&ctx).unwrap();
        assert_eq!(first.id(), "b1");
        assert_eq!(lb.acquire(&ctx).unwrap().id(), "b2");

        lb.set_strategy(StrategyKind::RoundRobin);
        assert_eq!(lb.active_strategy(), StrategyKind::RoundRobin);
        let picks: Vec<String> = (0..4)
            .map(|_| lb.acquire(&ctx).unwrap().id().to_string())
            .collect();
        assert_eq!(picks, vec!["b1", "b2", "b1", "b2"]);
    }

    #[tokio::test]
    async fn test_call_opens_breaker_and_skips_work() {
        let lb = LoadBalancer::with_settings(
            StrategyKind::RoundRobin,
            Some(breaker_config()),
            PerformanceConfig::default(),
        );
        let b1 = lb.add_server(backend("b1", 8080)).unwrap();
        let ctx = SelectionContext::new();
        let invoked = AtomicU32::new(0);

        for _ in 0..2 {
            let err = lb
                .call(&ctx, |_| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("downstream 503")
                })
                .await
                .unwrap_err();
            assert_eq!(err.into_inner(), Some("downstream 503"));
        }

        let err = lb
            .call(&ctx, |_| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 2);

        assert_eq!(b1.failed_requests(), 2);
        assert_eq!(b1.total_requests(), 3);
        assert_eq!(b1.active_connections(), 0);
        assert_eq!(lb.breaker_states()[0].state, crate::resilience::CircuitState::Open);
    }

    #[tokio::test]
    async fn test_call_without_breakers_and_tracking() {
        let lb = LoadBalancer::with_settings(
            StrategyKind::RoundRobin,
            None,
            PerformanceConfig::default(),
        );
        lb.add_server(backend("b1", 8080)).unwrap();
        let ctx = SelectionContext::new();

        for _ in 0..3 {
            let port = lb.call(&ctx, |b| async move { Ok::<_, ()>(b.port()) }).await.unwrap();
            assert_eq!(port, 8080);
        }
        assert!(lb.breaker_states().is_empty());

        let snapshot = lb.performance_snapshot();
        assert_eq!(snapshot.samples, 3);
        assert!(snapshot.requests_per_second > 0.0);

        let stats = lb.server_stats();
        assert_eq!(stats[0].total_requests, 3);
        assert_eq!(stats[0].failed_requests, 0);
    }

    #[tokio::test]
    async fn test_call_unavailable() {
        let lb = LoadBalancer::new(StrategyKind::IpHash);
        let err = lb
            .call(&SelectionContext::new(), |_| async { Ok::<_, ()>(()) })
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_report_flags_failing_backend() {
        let lb = LoadBalancer::with_settings(
            StrategyKind::RoundRobin,
            None,
            PerformanceConfig::default(),
        );
        lb.add_server(backend("b1", 8080)).unwrap();
        let ctx = SelectionContext::new();
        for _ in 0..4 {
            let _ = lb.call(&ctx, |_| async { Err::<(), _>("boom") }).await;
        }

        let found = lb.report_performance();
        let failing: Vec<_> = found.iter().filter(|b| b.metric == "failure_ratio").collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].component, "b1");
        assert_eq!(failing[0].severity, crate::performance::Severity::Critical);
    }

    #[test]
    fn test_concurrent_add_remove_keep_views_consistent() {
        let lb = Arc::new(LoadBalancer::new(StrategyKind::RoundRobin));

        for round in 0..2_000 {
            let adder = {
                let lb = lb.clone();
                std::thread::spawn(move || {
                    let _ = lb.add_server(backend("x", 8080));
                })
            };
            let remover = {
                let lb = lb.clone();
                std::thread::spawn(move || {
                    let _ = lb.remove_server("x");
                })
            };
            adder.join().unwrap();
            remover.join().unwrap();

            let registered = lb.registry().contains("x");
            for kind in StrategyKind::ALL {
                let held = lb.strategy(kind).servers().iter().any(|b| b.id() == "x");
                assert_eq!(held, registered, "round {round}: {kind} disagrees with registry");
            }
            assert_eq!(lb.breaker("x").is_some(), registered, "round {round}: breaker");

            let _ = lb.remove_server("x");
        }
    }

    #[test]
    fn test_reconcile() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        lb.add_server(backend("keep", 8080)).unwrap();
        lb.add_server(backend("drop", 8081)).unwrap();
        lb.add_server(backend("reweigh", 8082)).unwrap();
        let anonymous = lb.add_server(backend("anon", 8083)).unwrap();

        let entry = |id: Option<&str>, port: u16, weight: u32| BackendConfig {
            id: id.map(String::from),
            address: "127.0.0.1".into(),
            port,
            weight,
            region: None,
            metadata: Default::default(),
        };
        let config = BalancerConfig {
            strategy: StrategyKind::IpHash,
            backends: vec![
                entry(Some("keep"), 8080, 1),
                entry(Some("reweigh"), 8082, 3),
                entry(None, 8083, 1),
                entry(Some("new"), 8084, 1),
            ],
            ..BalancerConfig::default()
        };

        let report = lb.reconcile(&config);
        assert_eq!(report.removed, vec!["drop", "reweigh"]);
        assert_eq!(report.added, vec!["reweigh", "new"]);
        assert!(report.strategy_changed);
        assert_eq!(lb.active_strategy(), StrategyKind::IpHash);

        let ids: Vec<_> = lb.server_stats().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["anon", "keep", "new", "reweigh"]);
        assert!(Arc::ptr_eq(&lb.registry().get("anon").unwrap(), &anonymous));
        assert_eq!(lb.registry().get("reweigh").unwrap().weight(), 3);

        // Reapplying is a no-op
        let again = lb.reconcile(&config);
        assert_eq!(again, ReconcileReport::default());
    }
}
