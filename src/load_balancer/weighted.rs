//! Smooth weighted round-robin strategy.
//!
//! Each round every healthy backend gains its weight in "current weight",
//! the highest current weight wins and pays back the total. Picks come out
//! interleaved in proportion to weight instead of in bursts.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::{backend::BackendInstance, InstanceSelector, SelectionContext};

#[derive(Debug)]
struct WeightedEntry {
    server: Arc<BackendInstance>,
    current_weight: i64,
}

/// Smooth weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    entries: RwLock<Vec<WeightedEntry>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceSelector for WeightedRoundRobin {
    fn add_server(&self, server: Arc<BackendInstance>) {
        let mut entries = self.entries.write();
        match entries.iter().position(|e| e.server.id() == server.id()) {
            Some(idx) => entries[idx].server = server,
            None => entries.push(WeightedEntry {
                server,
                current_weight: 0,
            }),
        }
    }

    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|e| e.server.id() == id)?;
        Some(entries.remove(idx).server)
    }

    fn select(&self, _ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        let mut entries = self.entries.write();

        // Health is read once per entry so the total matches the bumps
        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;
        for (idx, entry) in entries.iter_mut().enumerate() {
            let weight = i64::from(entry.server.weight());
            if weight == 0 || !entry.server.is_healthy() {
                continue;
            }
            total += weight;
            entry.current_weight += weight;

            // Strict comparison keeps the first-encountered on ties
            if best.map_or(true, |(_, w)| entry.current_weight > w) {
                best = Some((idx, entry.current_weight));
            }
        }

        let (idx, _) = best?;
        let entry = &mut entries[idx];
        entry.current_weight -= total;
        entry.server.begin_request();
        Some(entry.server.clone())
    }

    fn servers(&self) -> Vec<Arc<BackendInstance>> {
        self.entries.read().iter().map(|e| e.server.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::HealthThresholds;

    fn weighted(id: &str, weight: u32) -> Arc<BackendInstance> {
        Arc::new(BackendInstance::new(id, "127.0.0.1", 8080).with_weight(weight))
    }

    fn picks(lb: &WeightedRoundRobin, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| lb.select(&SelectionContext::new()).unwrap().id().to_string())
            .collect()
    }

    #[test]
    fn test_smooth_interleaving() {
        let lb = WeightedRoundRobin::new();
        lb.add_server(weighted("a", 5));
        lb.add_server(weighted("b", 1));
        lb.add_server(weighted("c", 1));

        let seq = picks(&lb, 7);
        assert_eq!(seq, vec!["a", "a", "b", "a", "c", "a", "a"]);

        // The cycle repeats once current weights are back to zero
        assert_eq!(picks(&lb, 7), seq);
    }

    #[test]
    fn test_current_weights_stay_balanced() {
        let lb = WeightedRoundRobin::new();
        let a = weighted("a", 5);
        lb.add_server(a.clone());
        lb.add_server(weighted("b", 1));
        lb.add_server(weighted("c", 1));

        let sum = |lb: &WeightedRoundRobin| -> i64 {
            lb.entries.read().iter().map(|e| e.current_weight).sum()
        };

        picks(&lb, 3);
        assert_eq!(sum(&lb), 0);

        a.apply_probe(false, HealthThresholds::default());
        for _ in 0..5 {
            let picked = lb.select(&SelectionContext::new()).unwrap();
            assert_ne!(picked.id(), "a");
            assert_eq!(sum(&lb), 0);
        }
    }

    #[test]
    fn test_proportional_counts() {
        let lb = WeightedRoundRobin::new();
        lb.add_server(weighted("a", 3));
        lb.add_server(weighted("b", 2));

        let seq = picks(&lb, 50);
        assert_eq!(seq.iter().filter(|s| *s == "a").count(), 30);
        assert_eq!(seq.iter().filter(|s| *s == "b").count(), 20);
    }

    #[test]
    fn test_unhealthy_excluded_from_total() {
        let lb = WeightedRoundRobin::new();
        let a = weighted("a", 5);
        a.apply_probe(false, HealthThresholds::default());
        lb.add_server(a);
        lb.add_server(weighted("b", 1));
        lb.add_server(weighted("c", 1));

        assert_eq!(picks(&lb, 4), vec!["b", "c", "b", "c"]);
    }

    #[test]
    fn test_zero_total_weight_returns_none() {
        let lb = WeightedRoundRobin::new();
        assert!(lb.select(&SelectionContext::new()).is_none());

        lb.add_server(weighted("a", 0));
        lb.add_server(weighted("b", 0));
        assert!(lb.select(&SelectionContext::new()).is_none());

        lb.add_server(weighted("c", 2));
        assert_eq!(picks(&lb, 3), vec!["c", "c", "c"]);
    }

    #[test]
    fn test_remove_server() {
        let lb = WeightedRoundRobin::new();
        lb.add_server(weighted("a", 2));
        lb.add_server(weighted("b", 1));
        assert!(lb.remove_server("a").is_some());
        assert_eq!(picks(&lb, 2), vec!["b", "b"]);
        assert_eq!(lb.len(), 1);
    }
}
