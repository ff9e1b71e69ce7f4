//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from selection
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! Both thresholds default to 1, so a single failed probe ejects and a single
//! good probe restores. This module is the only writer of the health flag.

use std::fmt;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::load_balancer::backend::BackendInstance;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Consecutive probe outcomes for one instance.
#[derive(Debug, Default)]
pub struct HealthCounters {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// How many consecutive outcomes flip the state.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub healthy: u32,
    pub unhealthy: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: 1,
            unhealthy: 1,
        }
    }
}

/// A state change produced by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
}

impl BackendInstance {
    /// Apply one probe outcome, returning the transition if the state changed.
    pub(crate) fn apply_probe(
        &self,
        success: bool,
        thresholds: HealthThresholds,
    ) -> Option<HealthTransition> {
        let mut counters = self.health_counters.lock();

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_health_check_ms.store(now_ms.max(1), Ordering::Relaxed);

        let from = self.health_state();
        let to = if success {
            counters.consecutive_failures = 0;
            counters.consecutive_successes = counters.consecutive_successes.saturating_add(1);
            if from != HealthState::Healthy
                && counters.consecutive_successes >= thresholds.healthy.max(1)
            {
                HealthState::Healthy
            } else {
                from
            }
        } else {
            counters.consecutive_successes = 0;
            counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
            if from != HealthState::Unhealthy
                && counters.consecutive_failures >= thresholds.unhealthy.max(1)
            {
                HealthState::Unhealthy
            } else {
                from
            }
        };

        if to == from {
            return None;
        }

        self.state.store(to as u8, Ordering::Release);
        Some(HealthTransition { from, to })
    }
}
