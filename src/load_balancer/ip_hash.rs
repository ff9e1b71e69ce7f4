//! IP hash load balancing strategy.
//!
//! Maps a client key onto the currently healthy backends with a stable
//! 32-bit FNV-1a hash. The mapping only holds while the healthy set is
//! unchanged; any membership change may remap keys.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::{backend::BackendInstance, InstanceSelector, SelectionContext};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Client-key hash selector.
#[derive(Debug, Default)]
pub struct IpHash {
    servers: RwLock<Vec<Arc<BackendInstance>>>,
}

impl IpHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceSelector for IpHash {
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

    fn select(&self, ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        // Choice doesn't depend on load, a read lock is enough
        let servers = self.servers.read();
        let healthy: Vec<&Arc<BackendInstance>> =
            servers.iter().filter(|s| s.is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }

        let key = ctx.client_key.as_deref().unwrap_or_default();
        let idx = fnv1a_32(key.as_bytes()) as usize % healthy.len();

        let selected = healthy[idx];
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
        "ip_hash"
    }
}
