//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through, failures counted
//! - Open: dependency assumed down, calls rejected without being attempted
//! - Half-Open: a bounded number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call attempted after `timeout` since the last failure
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any trial failure (timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency
//! - No background timer: Open → Half-Open is decided lazily on the next call
//! - The guarded call's error is handed back untouched
//! - Outcomes of calls admitted before the last transition don't move the state

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;

/// Breaker thresholds. Immutable once the breaker is built.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long to stay open after the last failure.
    pub timeout: Duration,
    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Result of a guarded call.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call; nothing was attempted.
    #[error("circuit breaker '{dependency}' is open (retry in {retry_in:?})")]
    Open {
        dependency: String,
        /// Time left before a trial call is allowed; zero when only the
        /// half-open trial quota is exhausted.
        retry_in: Duration,
    },

    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected rather than attempted.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// The downstream error, if the call was attempted.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition; permits from an older phase are ignored.
    epoch: u64,
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_age_ms: Option<u64>,
}

/// Circuit breaker guarding a single dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
}

/// Admission for one call. A trial slot is handed back if the call is
/// dropped before its outcome is recorded.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut st = self.breaker.inner.write();
            if st.epoch == self.epoch {
                st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let dependency = dependency.into();
        metrics::record_circuit_state(&dependency, CircuitState::Closed);
        Self {
            dependency,
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                half_open_in_flight: 0,
                epoch: 0,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state. An expired Open stays Open here until a call arrives.
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let st = self.inner.read();
        CircuitSnapshot {
            dependency: self.dependency.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            last_failure_age_ms: st.last_failure.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut st = self.inner.write();
        self.transition(&mut st, CircuitState::Closed);
    }

    /// Run an async call through the breaker.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit::<E>()?;
        let result = f().await;
        self.settle(permit, result.is_ok());
        result.map_err(CircuitError::Inner)
    }

    /// Run a blocking call through the breaker.
    pub fn call_sync<F, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit::<E>()?;
        let result = f();
        self.settle(permit, result.is_ok());
        result.map_err(CircuitError::Inner)
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let mut st = self.inner.write();

        if st.state == CircuitState::Open {
            let expired = st
                .last_failure
                .map_or(true, |t| t.elapsed() >= self.config.timeout);
            if expired {
                self.transition(&mut st, CircuitState::HalfOpen);
            }
        }

        let trial = match st.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen
                if st.half_open_in_flight < self.config.half_open_max_requests.max(1) =>
            {
                st.half_open_in_flight += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                metrics::record_circuit_rejection(&self.dependency);
                let retry_in = match (st.state, st.last_failure) {
                    (CircuitState::Open, Some(t)) => {
                        self.config.timeout.saturating_sub(t.elapsed())
                    }
                    _ => Duration::ZERO,
                };
                return Err(CircuitError::Open {
                    dependency: self.dependency.clone(),
                    retry_in,
                });
            }
        };

        Ok(Permit {
            breaker: self,
            epoch: st.epoch,
            trial,
            settled: false,
        })
    }

    fn settle(&self, mut permit: Permit<'_>, success: bool) {
        permit.settled = true;
        let mut st = self.inner.write();

        if permit.trial && st.epoch == permit.epoch {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
        if st.epoch != permit.epoch {
            return;
        }

        match (st.state, success) {
            (CircuitState::Closed, true) => st.failure_count = 0,
            (CircuitState::Closed, false) => {
                st.failure_count += 1;
                st.last_failure = Some(Instant::now());
                if st.failure_count >= self.config.failure_threshold.max(1) {
                    self.transition(&mut st, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) => {
                st.success_count += 1;
                if st.success_count >= self.config.success_threshold.max(1) {
                    self.transition(&mut st, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, false) => {
                st.last_failure = Some(Instant::now());
                self.transition(&mut st, CircuitState::Open);
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState) {
        let from = st.state;
        st.state = to;
        st.epoch += 1;
        st.success_count = 0;
        st.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            st.failure_count = 0;
        }

        if from == to {
            return;
        }
        match to {
            CircuitState::Open => tracing::warn!(
                dependency = %self.dependency,
                from = %from,
                to = %to,
                failures = st.failure_count,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                dependency = %self.dependency,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_circuit_state(&self.dependency, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn breaker(timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "pricing",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                timeout: Duration::from_millis(timeout_ms),
                half_open_max_requests: 1,
            },
        )
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.call_sync(|| Err::<(), _>("boom"))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<u32, CircuitError<&'static str>> {
        cb.call_sync(|| Ok(7))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(10_000);
        for _ in 0..2 {
            assert!(matches!(fail(&cb), Err(CircuitError::Inner("boom"))));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(fail(&cb).is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let res: Result<(), CircuitError<&str>> = cb.call_sync(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(res.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "wrapped fn must not run while open");
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(10_000);
        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        assert_eq!(succeed(&cb).unwrap(), 7);
        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 2);
    }

    #[test]
    fn test_half_open_recovers_after_successes() {
        let cb = breaker(50);
        for _ in 0..3 {
            fail(&cb).unwrap_err();
        }
        assert!(succeed(&cb).unwrap_err().is_open());

        thread::sleep(Duration::from_millis(80));
        // Lazy: nothing changes until a call arrives
        assert_eq!(cb.state(), CircuitState::Open);

        assert_eq!(succeed(&cb).unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&cb).unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_timer() {
        let cb = breaker(60);
        for _ in 0..3 {
            fail(&cb).unwrap_err();
        }
        thread::sleep(Duration::from_millis(90));

        assert!(matches!(fail(&cb), Err(CircuitError::Inner("boom"))));
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted at the half-open failure
        assert!(succeed(&cb).unwrap_err().is_open());
        thread::sleep(Duration::from_millis(90));
        assert!(succeed(&cb).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(10_000);
        for _ in 0..3 {
            fail(&cb).unwrap_err();
        }
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_half_open_trial_quota() {
        let cb = std::sync::Arc::new(breaker(20));
        for _ in 0..3 {
            fail(&cb).unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // The single trial slot is taken
        let rejected = cb.call(|| async { Ok::<_, &'static str>(()) }).await;
        assert!(rejected.unwrap_err().is_open());

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.snapshot().success_count, 1);

        // Slot is free again
        cb.call(|| async { Ok::<_, &'static str>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_error_passes_through_unchanged() {
        #[derive(Debug, PartialEq)]
        struct Downstream(u16);

        let cb = breaker(10_000);
        let err = cb
            .call(|| async { Err::<(), _>(Downstream(503)) })
            .await
            .unwrap_err();
        assert_eq!(err.into_inner(), Some(Downstream(503)));
    }
}
