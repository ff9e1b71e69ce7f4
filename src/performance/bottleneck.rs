//! Bottleneck detection.
//!
//! Compares reported metric values against per-component thresholds and
//! records every breach with a severity derived from how far it overshoots.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;

use crate::observability::metrics;

/// Detections kept for inspection.
const HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity for `value / threshold`.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 2.0 {
            Severity::Critical
        } else if ratio >= 1.5 {
            Severity::High
        } else if ratio >= 1.2 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold breach.
#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub component: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub detected_at: SystemTime,
}

/// Threshold table plus a bounded history of detections.
#[derive(Debug, Default)]
pub struct BottleneckDetector {
    thresholds: RwLock<HashMap<(String, String), f64>>,
    detected: RwLock<VecDeque<Bottleneck>>,
}

impl BottleneckDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the threshold for `component`/`metric`. Non-positive values disable it.
    pub fn set_threshold(&self, component: &str, metric: &str, threshold: f64) {
        let key = (component.to_string(), metric.to_string());
        let mut thresholds = self.thresholds.write();
        if threshold > 0.0 {
            thresholds.insert(key, threshold);
        } else {
            thresholds.remove(&key);
        }
    }

    /// Check a value; a breach is logged, counted and returned.
    pub fn evaluate(&self, component: &str, metric: &str, value: f64) -> Option<Bottleneck> {
        let threshold = *self
            .thresholds
            .read()
            .get(&(component.to_string(), metric.to_string()))?;
        if value <= threshold {
            return None;
        }

        let bottleneck = Bottleneck {
            component: component.to_string(),
            metric: metric.to_string(),
            value,
            threshold,
            severity: Severity::from_ratio(value / threshold),
            detected_at: SystemTime::now(),
        };

        tracing::warn!(
            component = %component,
            metric = %metric,
            value,
            threshold,
            severity = %bottleneck.severity,
            "Bottleneck detected"
        );
        metrics::record_bottleneck(component, metric, bottleneck.severity.as_str());

        let mut detected = self.detected.write();
        if detected.len() == HISTORY {
            detected.pop_front();
        }
        detected.push_back(bottleneck.clone());

        Some(bottleneck)
    }

    /// Most recent detections, oldest first.
    pub fn recent(&self) -> Vec<Bottleneck> {
        self.detected.read().iter().cloned().collect()
    }
}
