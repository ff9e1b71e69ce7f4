//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend (detached task, own timeout)
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     Optional consecutive-outcome thresholds
//! ```
//!
//! # Design Decisions
//! - The checker is the only writer of a backend's health flag
//! - Health state is per-backend, not per-strategy
//! - Probe failures are absorbed here and never reach request callers

pub mod active;
pub mod state;

pub use active::HealthChecker;
pub use state::{HealthState, HealthThresholds, HealthTransition};
