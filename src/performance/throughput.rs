//! Request throughput over a sliding one-minute window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Width of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Timestamped request events within the last minute.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    events: RwLock<VecDeque<Instant>>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request now.
    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    /// Record a request at `at`. Timestamps are expected in non-decreasing order.
    pub fn record_at(&self, at: Instant) {
        let mut events = self.events.write();
        purge(&mut events, at);
        events.push_back(at);
    }

    /// Requests per second over the last minute.
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second_at(Instant::now())
    }

    /// Requests per second over the minute ending at `now`.
    pub fn requests_per_second_at(&self, now: Instant) -> f64 {
        let mut events = self.events.write();
        purge(&mut events, now);
        events.len() as f64 / WINDOW.as_secs_f64()
    }

    /// Events currently in the window (without purging).
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

fn purge(events: &mut VecDeque<Instant>, now: Instant) {
    let Some(cutoff) = now.checked_sub(WINDOW) else {
        return;
    };
    while events.front().is_some_and(|t| *t < cutoff) {
        events.pop_front();
    }
}
