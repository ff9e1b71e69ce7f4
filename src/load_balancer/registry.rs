//! Backend registry.
//!
//! # Responsibilities
//! - Hold every registered instance by id
//! - Hand the health checker a snapshot to probe
//!
//! Strategies keep their own lists; this map is the source of truth for
//! what is registered at all.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::BalancerError;
use crate::load_balancer::backend::BackendInstance;

/// Concurrent id → instance map.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<BackendInstance>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance; fails if the id is taken.
    pub fn insert(&self, backend: Arc<BackendInstance>) -> Result<(), BalancerError> {
        use dashmap::mapref::entry::Entry;

        match self.backends.entry(backend.id().to_string()) {
            Entry::Occupied(_) => Err(BalancerError::DuplicateBackend(backend.id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(backend);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<BackendInstance>> {
        self.backends.remove(id).map(|(_, b)| b)
    }

    pub fn get(&self, id: &str) -> Option<Arc<BackendInstance>> {
        self.backends.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Snapshot of all instances, sorted by id.
    pub fn all(&self) -> Vec<Arc<BackendInstance>> {
        let mut all: Vec<_> = self.backends.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|r| r.value().is_healthy()).count()
    }
}
