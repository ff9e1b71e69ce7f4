//! Round-robin load balancing strategy.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::{backend::BackendInstance, InstanceSelector, SelectionContext};

#[derive(Debug, Default)]
struct RoundRobinState {
    servers: Vec<Arc<BackendInstance>>,
    cursor: usize,
}

/// Round-robin selector.
/// Rotates a single cursor through the list, skipping unhealthy backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    inner: RwLock<RoundRobinState>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceSelector for RoundRobin {
    fn add_server(&self, server: Arc<BackendInstance>) {
        let mut state = self.inner.write();
        match state.servers.iter().position(|s| s.id() == server.id()) {
            Some(idx) => state.servers[idx] = server,
            None => state.servers.push(server),
        }
    }

    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>> {
        let mut state = self.inner.write();
        let idx = state.servers.iter().position(|s| s.id() == id)?;
        let removed = state.servers.remove(idx);

        // Keep the cursor on the same successor
        if idx < state.cursor {
            state.cursor -= 1;
        }
        if state.cursor >= state.servers.len() {
            state.cursor = 0;
        }
        Some(removed)
    }

    fn select(&self, _ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        // Scan and cursor move are one unit under the write lock
        let mut state = self.inner.write();
        let len = state.servers.len();

        for _ in 0..len {
            let idx = state.cursor % len;
            state.cursor = (idx + 1) % len;

            let server = &state.servers[idx];
            if server.is_healthy() {
                server.begin_request();
                return Some(server.clone());
            }
        }
        None
    }

    fn servers(&self) -> Vec<Arc<BackendInstance>> {
        self.inner.read().servers.clone()
    }

    fn len(&self) -> usize {
        self.inner.read().servers.len()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
