//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call to a backend:
//!     → circuit_breaker.rs (admit or reject)
//!     → caller's future runs (with whatever timeout it carries)
//!     → outcome recorded, state updated
//! ```
//!
//! # Design Decisions
//! - One breaker per backend; breakers never share state
//! - The breaker adds no call timeout of its own
//! - Rejections are a distinct error, separate from downstream failures

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitSnapshot, CircuitState,
};
