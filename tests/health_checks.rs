//! Health checker against live mock backends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backend_balancer::config::HealthCheckConfig;
use backend_balancer::health::{HealthChecker, HealthState};
use backend_balancer::lifecycle::Shutdown;
use backend_balancer::load_balancer::registry::BackendRegistry;
use backend_balancer::BackendInstance;

mod common;

async fn switchable_backend() -> (SocketAddr, Arc<AtomicU16>) {
    let status = Arc::new(AtomicU16::new(200));
    let s = status.clone();
    let addr = common::start_programmable_backend(move || {
        let s = s.clone();
        async move { (s.load(Ordering::SeqCst), "ok".to_string()) }
    })
    .await;
    (addr, status)
}

fn registry_with(addr: SocketAddr) -> (Arc<BackendRegistry>, Arc<BackendInstance>) {
    let registry = Arc::new(BackendRegistry::new());
    let backend = Arc::new(BackendInstance::new("b1", addr.ip().to_string(), addr.port()));
    registry.insert(backend.clone()).unwrap();
    (registry, backend)
}

fn config() -> HealthCheckConfig {
    HealthCheckConfig {
        interval_ms: 50,
        timeout_ms: 500,
        ..HealthCheckConfig::default()
    }
}

#[tokio::test]
async fn test_bad_status_flips_then_recovers() {
    let (addr, status) = switchable_backend().await;
    let (registry, backend) = registry_with(addr);
    let checker = HealthChecker::new(registry, config());

    checker.check_now().await;
    assert!(backend.is_healthy());
    assert!(backend.last_health_check().is_some());

    status.store(503, Ordering::SeqCst);
    checker.check_now().await;
    assert_eq!(backend.health_state(), HealthState::Unhealthy);

    status.store(200, Ordering::SeqCst);
    let transition = checker.check_backend(&backend).await.unwrap();
    assert_eq!(transition.from, HealthState::Unhealthy);
    assert_eq!(transition.to, HealthState::Healthy);
}

#[tokio::test]
async fn test_expected_status_is_exact() {
    let addr = common::start_mock_backend(200, "fine").await;
    let (registry, backend) = registry_with(addr);
    let checker = HealthChecker::new(
        registry,
        HealthCheckConfig {
            expected_status: Some(204),
            ..config()
        },
    );

    checker.check_now().await;
    assert!(!backend.is_healthy());
}

#[tokio::test]
async fn test_slow_probe_times_out() {
    let addr = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_millis(400)).await;
        (200, "late".to_string())
    })
    .await;
    let (registry, backend) = registry_with(addr);
    let checker = HealthChecker::new(
        registry,
        HealthCheckConfig {
            timeout_ms: 100,
            ..config()
        },
    );

    checker.check_now().await;
    assert!(!backend.is_healthy());
}

#[tokio::test]
async fn test_unhealthy_threshold() {
    let (addr, status) = switchable_backend().await;
    let (registry, backend) = registry_with(addr);
    let checker = HealthChecker::new(
        registry,
        HealthCheckConfig {
            unhealthy_threshold: 2,
            ..config()
        },
    );

    status.store(500, Ordering::SeqCst);
    checker.check_now().await;
    assert!(backend.is_healthy(), "one failure is below the threshold");
    checker.check_now().await;
    assert!(!backend.is_healthy());
}

#[tokio::test]
async fn test_background_loop_tracks_backend() {
    let (addr, status) = switchable_backend().await;
    let (registry, backend) = registry_with(addr);
    let checker = Arc::new(HealthChecker::new(registry, config()));

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(checker.clone().run(shutdown.subscribe()));

    status.store(503, Ordering::SeqCst);
    assert!(common::wait_until(Duration::from_secs(3), || !backend.is_healthy()).await);

    status.store(200, Ordering::SeqCst);
    assert!(common::wait_until(Duration::from_secs(3), || backend.is_healthy()).await);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_hung_backend_does_not_stall_loop() {
    let hung_addr = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        (200, "late".to_string())
    })
    .await;
    let (addr, status) = switchable_backend().await;

    let (registry, backend) = registry_with(addr);
    let hung = Arc::new(BackendInstance::new(
        "hung",
        hung_addr.ip().to_string(),
        hung_addr.port(),
    ));
    registry.insert(hung.clone()).unwrap();

    // Probe timeout far beyond the interval, so the hung probe stays pending
    let checker = Arc::new(HealthChecker::new(
        registry,
        HealthCheckConfig {
            timeout_ms: 10_000,
            ..config()
        },
    ));

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(checker.clone().run(shutdown.subscribe()));

    status.store(503, Ordering::SeqCst);
    assert!(common::wait_until(Duration::from_secs(3), || !backend.is_healthy()).await);

    status.store(200, Ordering::SeqCst);
    assert!(common::wait_until(Duration::from_secs(3), || backend.is_healthy()).await);

    assert!(hung.is_healthy());
    assert!(hung.last_health_check().is_none());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
