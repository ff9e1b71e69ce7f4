//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → LoadBalancer → first health round → background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → tasks leave their loops → joined
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: balancer first, then health, then admin API
//! - Shutdown has timeout: tasks still running after the deadline are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
