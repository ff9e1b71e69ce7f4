//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::state::HealthThresholds;
use crate::load_balancer::backend::BackendInstance;
use crate::load_balancer::StrategyKind;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy active at startup.
    pub strategy: StrategyKind,

    /// Backend instance definitions.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Per-backend circuit breaker settings.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Latency tracking and bottleneck thresholds.
    pub performance: PerformanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Backend instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier. A v4 UUID is assigned when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Host name or IP address.
    pub address: String,

    pub port: u16,

    /// Weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Region tag for geographic routing.
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    /// Build a fresh instance, using `id` when the config has none.
    pub fn to_instance_with_id(&self, id: String) -> BackendInstance {
        let mut instance =
            BackendInstance::new(id, self.address.clone(), self.port).with_weight(self.weight);
        for (key, value) in &self.metadata {
            instance = instance.with_metadata(key.clone(), value.clone());
        }
        if let Some(region) = &self.region {
            instance = instance.with_region(region.clone());
        }
        instance
    }

    /// Build a fresh instance with its configured id or a new UUID.
    pub fn to_instance(&self) -> BackendInstance {
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.to_instance_with_id(id)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe.
    pub path: String,

    /// Status code that counts as healthy. Any 2xx when unset.
    pub expected_status: Option<u16>,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            expected_status: None,
            healthy_threshold: 1,
            unhealthy_threshold: 1,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            healthy: self.healthy_threshold,
            unhealthy: self.unhealthy_threshold,
        }
    }
}

/// Circuit breaker configuration as read from the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Wrap calls to each backend in its own breaker.
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Time spent open before a trial call, in milliseconds.
    pub timeout_ms: u64,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            half_open_max_requests: self.half_open_max_requests,
        }
    }
}

/// Performance tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Response-time samples kept.
    pub latency_capacity: usize,

    /// How often the reporter logs a snapshot.
    pub report_interval_secs: u64,

    /// p95 latency above which a bottleneck is reported. 0 disables.
    pub p95_latency_threshold_ms: u64,

    /// Failed/total ratio above which a backend is reported.
    pub failure_ratio_threshold: f64,

    /// Requests per second above which the balancer is reported. 0 disables.
    pub rps_threshold: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            latency_capacity: 10_000,
            report_interval_secs: 30,
            p95_latency_threshold_ms: 500,
            failure_ratio_threshold: 0.05,
            rps_threshold: 0.0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
