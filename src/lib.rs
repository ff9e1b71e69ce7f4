//! Health-aware backend load balancing.
//!
//! A [`LoadBalancer`] picks a healthy backend per request with one of five
//! strategies, guards calls with a per-backend circuit breaker and tracks
//! latency and throughput. A [`HealthChecker`] probes backends in the
//! background and is the only writer of their health.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod performance;
pub mod resilience;

pub use config::BalancerConfig;
pub use error::{BalancerError, CallError};
pub use health::HealthChecker;
pub use lifecycle::Shutdown;
pub use load_balancer::backend::{BackendInstance, BackendLease};
pub use load_balancer::balancer::LoadBalancer;
pub use load_balancer::{InstanceSelector, SelectionContext, Strategy, StrategyKind};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
