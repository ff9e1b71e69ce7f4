//! Backend instance abstraction.
//!
//! # Responsibilities
//! - Represent a single downstream instance (address, weight, metadata)
//! - Track live counters (active connections, totals, failures, latency)
//! - Expose the health flag for wait-free reads on the selection path
//!
//! The health flag is only written by the health module (see `health::state`).
//! Strategies read it and bump the request counters, nothing else.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::health::state::{HealthCounters, HealthState};

/// Metadata key holding the region tag used by geographic routing.
pub const REGION_KEY: &str = "region";

const NO_LATENCY_SAMPLE: u64 = u64::MAX;

/// A single backend instance.
#[derive(Debug)]
pub struct BackendInstance {
    id: String,
    address: String,
    port: u16,
    weight: u32,
    metadata: HashMap<String, String>,

    /// Current health state (see [`HealthState`]).
    pub(crate) state: AtomicU8,
    /// Consecutive probe outcomes, guarded for the health checker only.
    pub(crate) health_counters: Mutex<HealthCounters>,
    /// Unix millis of the last completed probe, 0 if never probed.
    pub(crate) last_health_check_ms: AtomicU64,

    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    /// Averaged latency in microseconds, `NO_LATENCY_SAMPLE` until the first sample.
    average_latency_us: AtomicU64,
}

impl BackendInstance {
    /// Create a new instance with weight 1 and no metadata.
    ///
    /// Instances start healthy so traffic can flow before the first probe.
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            weight: 1,
            metadata: HashMap::new(),
            state: AtomicU8::new(HealthState::Healthy as u8),
            health_counters: Mutex::new(HealthCounters::default()),
            last_health_check_ms: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            average_latency_us: AtomicU64::new(NO_LATENCY_SAMPLE),
        }
    }

    /// Set the static weight used by weighted strategies.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Tag the instance with a region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.metadata.insert(REGION_KEY.to_string(), region.into());
        self
    }

    /// Attach a free-form metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Region tag, if any.
    pub fn region(&self) -> Option<&str> {
        self.metadata.get(REGION_KEY).map(String::as_str)
    }

    /// `address:port`, as used to reach the instance.
    pub fn connection_string(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    // --- Health (read side) ---

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// True if the instance may receive traffic.
    pub fn is_healthy(&self) -> bool {
        self.health_state() == HealthState::Healthy
    }

    /// Time of the last completed health probe.
    pub fn last_health_check(&self) -> Option<SystemTime> {
        match self.last_health_check_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    // --- Counters ---

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn average_latency(&self) -> Duration {
        match self.average_latency_us.load(Ordering::Relaxed) {
            NO_LATENCY_SAMPLE => Duration::ZERO,
            us => Duration::from_micros(us),
        }
    }

    /// Selection side effect: one more active connection and one more request.
    pub(crate) fn begin_request(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Release one active connection. Never goes below zero.
    pub fn release(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Count a failed request against this instance.
    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a latency sample into the running average.
    ///
    /// The first sample seeds the average; later ones halve the distance.
    pub fn record_latency(&self, latency: Duration) {
        let sample = latency.as_micros().min(u128::from(NO_LATENCY_SAMPLE - 1)) as u64;
        let _ = self
            .average_latency_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                if avg == NO_LATENCY_SAMPLE {
                    Some(sample)
                } else {
                    Some(avg / 2 + sample / 2 + (avg % 2 + sample % 2) / 2)
                }
            });
    }

    /// Point-in-time view for reporting.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            port: self.port,
            weight: self.weight,
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests(),
            average_latency_ms: self.average_latency().as_secs_f64() * 1000.0,
            last_health_check_ms: match self.last_health_check_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
            metadata: self.metadata.clone(),
        }
    }
}

/// Serializable view of a [`BackendInstance`].
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub last_health_check_ms: Option<u64>,
    pub metadata: HashMap<String, String>,
}

/// A RAII lease on a selected backend.
///
/// The active connection taken at selection time is released on drop.
#[derive(Debug)]
pub struct BackendLease {
    backend: Arc<BackendInstance>,
}

impl BackendLease {
    pub(crate) fn new(backend: Arc<BackendInstance>) -> Self {
        Self { backend }
    }

    /// The leased instance.
    pub fn instance(&self) -> &Arc<BackendInstance> {
        &self.backend
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, latency: Duration) {
        self.backend.record_latency(latency);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.backend.record_failure();
    }
}

impl Deref for BackendLease {
    type Target = BackendInstance;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.backend.release();
    }
}
