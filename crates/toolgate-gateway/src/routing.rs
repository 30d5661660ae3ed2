//! Path → adapter routing table

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use toolgate_core::Service;

/// Lock-guarded map from mount path to adapter.
///
/// Cloning shares the same table, so handlers built at start time see every
/// later insert and removal.
#[derive(Clone, Default)]
pub struct RoutingTable {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Service>>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `service` at its endpoint, returning the adapter it replaced
    pub fn insert(&self, service: Arc<dyn Service>) -> Option<Arc<dyn Service>> {
        let path = service.endpoint().to_string();
        self.inner.write().insert(path, service)
    }

    pub fn remove(&self, path: &str) -> Option<Arc<dyn Service>> {
        self.inner.write().remove(path)
    }

    /// Adapter serving `path`: an exact mount match, or the longest mount
    /// path that `path` extends with a `/`-separated suffix
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn Service>> {
        let table = self.inner.read();
        if let Some(service) = table.get(path) {
            return Some(service.clone());
        }

        table
            .iter()
            .filter(|(mount, _)| {
                path.strip_prefix(mount.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(mount, _)| mount.len())
            .map(|(_, service)| service.clone())
    }

    /// Mounted adapters sorted by path
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn Service>)> {
        let mut entries: Vec<_> = self
            .inner
            .read()
            .iter()
            .map(|(path, service)| (path.clone(), service.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
