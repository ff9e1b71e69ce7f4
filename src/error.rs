//! Error types for backend selection.

use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitError;

/// Errors produced by the load balancer facade and its registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalancerError {
    /// The active strategy found no healthy backend.
    #[error("no healthy backend available (strategy: {strategy})")]
    NoHealthyBackend { strategy: &'static str },

    /// A backend id was not registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A backend with the same id is already registered.
    #[error("backend already registered: {0}")]
    DuplicateBackend(String),

    /// The backend address could not be turned into a URL.
    #[error("invalid backend address: {0}")]
    InvalidAddress(String),
}

impl BalancerError {
    /// True for the "no healthy backend" outcome, which callers usually map to 503.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BalancerError::NoHealthyBackend { .. })
    }
}

/// Outcome of [`LoadBalancer::call`](crate::load_balancer::balancer::LoadBalancer::call)
/// when it does not produce a value.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// No healthy backend; nothing was attempted.
    #[error("{0}")]
    Unavailable(BalancerError),

    /// The backend's breaker rejected the call, or the call itself failed.
    #[error("{0}")]
    Circuit(CircuitError<E>),
}

impl<E> CallError<E> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CallError::Unavailable(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::Circuit(e) if e.is_open())
    }

    /// The downstream error, if a call was made and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Circuit(e) => e.into_inner(),
            CallError::Unavailable(_) => None,
        }
    }
}
