//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, ports valid)
//! - Detect duplicate backend ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - BalancerConfig → Result<(), Vec<ValidationError>>; suspicious but legal values are only logged
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BalancerConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duplicate backend id '{0}'")]
    DuplicateBackendId(String),

    #[error("backend #{index} has an empty address")]
    EmptyAddress { index: usize },

    #[error("backend #{index} has port 0")]
    InvalidPort { index: usize },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("health check path '{0}' must start with '/'")]
    RelativeHealthPath(String),

    #[error("health check expected_status {0} is not a valid HTTP status")]
    InvalidStatus(u16),

    #[error("performance.failure_ratio_threshold {0} must be in (0, 1]")]
    FailureRatioOutOfRange(f64),

    #[error("{field} '{value}' is not a socket address")]
    InvalidBindAddress { field: &'static str, value: String },
}

pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (index, backend) in config.backends.iter().enumerate() {
        if let Some(id) = &backend.id {
            if !seen.insert(id.as_str()) {
                errors.push(ValidationError::DuplicateBackendId(id.clone()));
            }
        }
        if backend.address.trim().is_empty() {
            errors.push(ValidationError::EmptyAddress { index });
        }
        if backend.port == 0 {
            errors.push(ValidationError::InvalidPort { index });
        }
    }

    let hc = &config.health_check;
    require_nonzero(&mut errors, "health_check.interval_ms", hc.interval_ms);
    require_nonzero(&mut errors, "health_check.timeout_ms", hc.timeout_ms);
    require_nonzero(&mut errors, "health_check.healthy_threshold", hc.healthy_threshold as u64);
    require_nonzero(&mut errors, "health_check.unhealthy_threshold", hc.unhealthy_threshold as u64);
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::RelativeHealthPath(hc.path.clone()));
    }
    if let Some(status) = hc.expected_status {
        if !(100..=599).contains(&status) {
            errors.push(ValidationError::InvalidStatus(status));
        }
    }
    if hc.enabled && hc.timeout_ms >= hc.interval_ms && hc.interval_ms > 0 {
        tracing::warn!(
            timeout_ms = hc.timeout_ms,
            interval_ms = hc.interval_ms,
            "Health probe timeout is not shorter than the interval; probes may overlap"
        );
    }

    let cb = &config.circuit_breaker;
    require_nonzero(&mut errors, "circuit_breaker.failure_threshold", cb.failure_threshold as u64);
    require_nonzero(&mut errors, "circuit_breaker.success_threshold", cb.success_threshold as u64);
    require_nonzero(&mut errors, "circuit_breaker.timeout_ms", cb.timeout_ms);
    require_nonzero(
        &mut errors,
        "circuit_breaker.half_open_max_requests",
        cb.half_open_max_requests as u64,
    );

    let perf = &config.performance;
    require_nonzero(&mut errors, "performance.latency_capacity", perf.latency_capacity as u64);
    require_nonzero(&mut errors, "performance.report_interval_secs", perf.report_interval_secs);
    if !(perf.failure_ratio_threshold > 0.0 && perf.failure_ratio_threshold <= 1.0) {
        errors.push(ValidationError::FailureRatioOutOfRange(perf.failure_ratio_threshold));
    }

    if config.observability.metrics_enabled {
        require_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        require_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn require_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn require_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field,
            value: value.to_string(),
        });
    }
}
