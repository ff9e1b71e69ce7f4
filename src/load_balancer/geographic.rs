//! Geographic routing strategy.
//!
//! Backends are grouped by their region tag. A caller's own region is tried
//! first; otherwise regions are scanned in name order and the first healthy
//! backend anywhere wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::load_balancer::{backend::BackendInstance, InstanceSelector, SelectionContext};

/// Region used for backends registered without a region tag.
pub const DEFAULT_REGION: &str = "default";

/// Region-aware selector.
#[derive(Debug, Default)]
pub struct GeographicRouting {
    regions: RwLock<BTreeMap<String, Vec<Arc<BackendInstance>>>>,
}

impl GeographicRouting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regions that currently have at least one backend.
    pub fn regions(&self) -> Vec<String> {
        self.regions.read().keys().cloned().collect()
    }

    fn first_healthy(servers: &[Arc<BackendInstance>]) -> Option<&Arc<BackendInstance>> {
        servers.iter().find(|s| s.is_healthy())
    }
}

impl InstanceSelector for GeographicRouting {
    fn add_server(&self, server: Arc<BackendInstance>) {
        let region = server.region().unwrap_or(DEFAULT_REGION).to_string();
        let mut regions = self.regions.write();

        // An id moving between regions must not stay listed in the old one
        for servers in regions.values_mut() {
            servers.retain(|s| s.id() != server.id());
        }
        regions.retain(|_, servers| !servers.is_empty());

        regions.entry(region).or_default().push(server);
    }

    fn remove_server(&self, id: &str) -> Option<Arc<BackendInstance>> {
        let mut regions = self.regions.write();
        let mut removed = None;
        for servers in regions.values_mut() {
            if let Some(idx) = servers.iter().position(|s| s.id() == id) {
                removed = Some(servers.remove(idx));
                break;
            }
        }
        regions.retain(|_, servers| !servers.is_empty());
        removed
    }

    fn select(&self, ctx: &SelectionContext) -> Option<Arc<BackendInstance>> {
        let regions = self.regions.read();
        let preferred = ctx.region.as_deref();

        let local = preferred
            .and_then(|r| regions.get(r))
            .and_then(|servers| Self::first_healthy(servers));

        let selected = match local {
            Some(s) => s,
            None => {
                if let Some(region) = preferred {
                    tracing::debug!(region = %region, "No healthy backend in caller region, falling back");
                }
                regions
                    .iter()
                    .filter(|(name, _)| Some(name.as_str()) != preferred)
                    .find_map(|(_, servers)| Self::first_healthy(servers))?
            }
        };

        selected.begin_request();
        Some(selected.clone())
    }

    fn servers(&self) -> Vec<Arc<BackendInstance>> {
        self.regions.read().values().flatten().cloned().collect()
    }

    fn len(&self) -> usize {
        self.regions.read().values().map(Vec::len).sum()
    }

    fn name(&self) -> &'static str {
        "geographic"
    }
}
