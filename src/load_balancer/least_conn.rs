//! Least Connections load balancing strategy.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::{backend::BackendInstance, InstanceSelector, SelectionContext};

/// Least connections selector.
/// Selects the healthy backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections {
    servers: RwLock<Vec<Arc<BackendInstance>>>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceSelector for LeastConnections {
    fn add_server(&self, server: Arc<BackendInstance>) {
        let mut servers = self.servers.write();
        match servers.iter().position(|s| s.id() == server.id()) {
            Some(idx) => servers[idx] = server,
            None => servers.push(server),
        }
    }

    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>> {
        let mut servers = self.servers.write();
        let idx = servers.iter().position(|s| s.id() == id)?;
        Some(servers.remove(idx))
    }

    fn select(&self, _ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        // Held across observe-and-increment so two callers can't both
        // see the same backend as least loaded.
        let servers = self.servers.write();

        // In case of tie, the first one is selected (stability)
        let selected = servers
            .iter()
            .filter(|s| s.is_healthy())
            .min_by_key(|s| s.active_connections())?;

        selected.begin_request();
        Some(selected.clone())
    }

    fn servers(&self) -> Vec<Arc<BackendInstance>> {
        self.servers.read().clone()
    }

    fn len(&self) -> usize {
        self.servers.read().len()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
