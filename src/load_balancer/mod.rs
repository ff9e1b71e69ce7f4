//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Caller asks the facade for an instance
//!     → balancer.rs (active strategy, per-backend circuit breaker)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - weighted.rs (smooth weighted round robin)
//!         - ip_hash.rs (client key → healthy backend)
//!         - geographic.rs (caller region first, then any region)
//!     → backend.rs (lease with connection accounting)
//!     → Return lease or "no healthy backend"
//! ```
//!
//! # Design Decisions
//! - Every strategy keeps its own locked list; no lock is shared between strategies
//! - Selection and the connection-count bump happen under the strategy's write lock
//! - Unhealthy backends are never returned
//! - Strategies read health, they never write it

pub mod backend;
pub mod balancer;
pub mod geographic;
pub mod ip_hash;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use self::backend::BackendInstance;
use self::geographic::GeographicRouting;
use self::ip_hash::IpHash;
use self::least_conn::LeastConnections;
use self::round_robin::RoundRobin;
use self::weighted::WeightedRoundRobin;

/// Per-request inputs some strategies use.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// Client key for IP hash (usually the client address).
    pub client_key: Option<String>,
    /// Caller region for geographic routing.
    pub region: Option<String>,
}

impl SelectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Capability shared by every selection algorithm.
pub trait InstanceSelector: Send + Sync {
    /// Register an instance. Re-adding an id already present replaces it.
    fn add_server(&self, server: Arc<BackendInstance>);

    /// Deregister an instance, returning it if it was present.
    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>>;

    /// Pick a healthy instance, bumping its connection and request counters.
    fn select(&self, ctx: &SelectionContext) -> Option<Arc<BackendInstance>>;

    /// Snapshot of the registered instances.
    fn servers(&self) -> Vec<Arc<BackendInstance>>;

    fn len(&self) -> usize {
        self.servers().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str;
}

/// The selection algorithm in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    IpHash,
    Geographic,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::RoundRobin,
        StrategyKind::LeastConnections,
        StrategyKind::WeightedRoundRobin,
        StrategyKind::IpHash,
        StrategyKind::Geographic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::LeastConnections => "least_connections",
            StrategyKind::WeightedRoundRobin => "weighted_round_robin",
            StrategyKind::IpHash => "ip_hash",
            StrategyKind::Geographic => "geographic",
        }
    }
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::LeastConnections
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown strategy: {}", s))
    }
}

/// One of the five selection algorithms.
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
    WeightedRoundRobin(WeightedRoundRobin),
    IpHash(IpHash),
    Geographic(GeographicRouting),
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::RoundRobin => Strategy::RoundRobin(RoundRobin::new()),
            StrategyKind::LeastConnections => Strategy::LeastConnections(LeastConnections::new()),
            StrategyKind::WeightedRoundRobin => {
                Strategy::WeightedRoundRobin(WeightedRoundRobin::new())
            }
            StrategyKind::IpHash => Strategy::IpHash(IpHash::new()),
            StrategyKind::Geographic => Strategy::Geographic(GeographicRouting::new()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RoundRobin(_) => StrategyKind::RoundRobin,
            Strategy::LeastConnections(_) => StrategyKind::LeastConnections,
            Strategy::WeightedRoundRobin(_) => StrategyKind::WeightedRoundRobin,
            Strategy::IpHash(_) => StrategyKind::IpHash,
            Strategy::Geographic(_) => StrategyKind::Geographic,
        }
    }

    fn selector(&self) -> &dyn InstanceSelector {
        match self {
            Strategy::RoundRobin(s) => s,
            Strategy::LeastConnections(s) => s,
            Strategy::WeightedRoundRobin(s) => s,
            Strategy::IpHash(s) => s,
            Strategy::Geographic(s) => s,
        }
    }
}

impl InstanceSelector for Strategy {
    fn add_server(&self, server: Arc<BackendInstance>) {
        self.selector().add_server(server)
    }

    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>> {
        self.selector().remove_server(id)
    }

    fn select(&self, ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        self.selector().select(ctx)
    }

    fn servers(&self) -> Vec<Arc<BackendInstance>> {
        self.selector().servers()
    }

    fn len(&self) -> usize {
        self.selector().len()
    }

    fn name(&self) -> &'static str {
        self.selector().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::HealthThresholds;
    use std::thread;

    #[test]
    fn test_strategy_kind_roundtrip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>(), Ok(kind));
            assert_eq!(Strategy::new(kind).kind(), kind);
            assert_eq!(Strategy::new(kind).name(), kind.as_str());
        }
        assert!("random".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_no_strategy_returns_unhealthy_under_churn() {
        for kind in StrategyKind::ALL {
            let strategy = Arc::new(Strategy::new(kind));
            let sick = Arc::new(BackendInstance::new("sick", "127.0.0.1", 9000).with_region("a"));
            sick.apply_probe(false, HealthThresholds::default());
            strategy.add_server(sick);

            let writer = {
                let strategy = strategy.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let id = format!("b{}", i % 4);
                        if i % 3 == 0 {
                            strategy.remove_server(&id);
                        } else {
                            let b = BackendInstance::new(id, "127.0.0.1", 8000 + (i % 4) as u16)
                                .with_region(if i % 2 == 0 { "a" } else { "b" });
                            strategy.add_server(Arc::new(b));
                        }
                    }
                })
            };

            let readers: Vec<_> = (0..4)
                .map(|r| {
                    let strategy = strategy.clone();
                    thread::spawn(move || {
                        let ctx = SelectionContext::new()
                            .with_client_key(format!("10.0.0.{}", r))
                            .with_region("a");
                        for _ in 0..500 {
                            if let Some(b) = strategy.select(&ctx) {
                                assert!(b.is_healthy(), "{} returned an unhealthy backend", kind);
                                b.release();
                            }
                        }
                    })
                })
                .collect();

            writer.join().unwrap();
            for r in readers {
                r.join().unwrap();
            }
        }
    }
}
