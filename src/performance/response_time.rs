//! Response-time tracking.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::RwLock;

/// Default number of samples kept.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded buffer of observed durations.
#[derive(Debug)]
pub struct ResponseTimeTracker {
    samples: RwLock<VecDeque<Duration>>,
    capacity: usize,
}

impl Default for ResponseTimeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResponseTimeTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn record(&self, duration: Duration) {
        let mut samples = self.samples.write();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(duration);
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean of the buffered samples, zero when empty.
    pub fn average(&self) -> Duration {
        let samples = self.samples.read();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    /// Sample at index `floor(len * p / 100)` of a sorted copy, clamped to the
    /// last index. Zero when empty.
    pub fn percentile(&self, p: f64) -> Duration {
        let sorted = self.sorted();
        percentile_of(&sorted, p)
    }

    /// Several percentiles from one sorted copy.
    pub fn percentiles(&self, ps: &[f64]) -> Vec<Duration> {
        let sorted = self.sorted();
        ps.iter().map(|p| percentile_of(&sorted, *p)).collect()
    }

    fn sorted(&self) -> Vec<Duration> {
        let mut copy: Vec<Duration> = self.samples.read().iter().copied().collect();
        copy.sort_unstable();
        copy
    }
}

fn percentile_of(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let p = p.clamp(0.0, 100.0);
    let idx = ((sorted.len() as f64 * p / 100.0).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}
