//! Performance tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Completed call (facade)
//!     → response_time.rs (bounded latency buffer → average, percentiles)
//!     → throughput.rs (one-minute sliding window → requests/sec)
//!
//! Periodic report (facade)
//!     → snapshot of both trackers
//!     → bottleneck.rs (threshold check, severity, log + metric)
//! ```
//!
//! # Design Decisions
//! - Buffers are bounded; the oldest samples are evicted first
//! - Percentiles sort a copy, never the live buffer
//! - One lock per tracker

pub mod bottleneck;
pub mod response_time;
pub mod throughput;

use serde::Serialize;

pub use bottleneck::{Bottleneck, BottleneckDetector, Severity};
pub use response_time::ResponseTimeTracker;
pub use throughput::ThroughputTracker;

/// Aggregated view over both trackers.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub samples: usize,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub requests_per_second: f64,
}
