//! Service registry - maps a service kind to the factory that builds it

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::service::{Service, ServiceConfig, ServiceKind};

/// Builds an adapter from its configuration and request timeout
pub type ServiceFactory =
    Arc<dyn Fn(&dyn ServiceConfig, Duration) -> ServiceResult<Arc<dyn Service>> + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    factories: HashMap<ServiceKind, ServiceFactory>,
    /// Sorted snapshot of registered kinds, cleared on every write
    kinds: Option<Vec<ServiceKind>>,
}

/// Kind → factory table.
///
/// Registration normally happens once before any `create` call, but all
/// methods are safe to interleave from different threads. Factories are
/// invoked outside the lock so a slow factory never blocks registration.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the factory for `kind`
    pub fn register<F>(&self, kind: ServiceKind, factory: F)
    where
        F: Fn(&dyn ServiceConfig, Duration) -> ServiceResult<Arc<dyn Service>>
            + Send
            + Sync
            + 'static,
    {
        let mut inner = self.inner.write();
        if inner.factories.insert(kind, Arc::new(factory)).is_some() {
            debug!(kind = %kind, "Replacing registered service factory");
        }
        inner.kinds = None;
    }

    /// Build an adapter for `config` using the factory registered for its kind
    pub fn create(
        &self,
        config: &dyn ServiceConfig,
        timeout: Duration,
    ) -> ServiceResult<Arc<dyn Service>> {
        let kind = config.kind();
        let factory = self
            .inner
            .read()
            .factories
            .get(&kind)
            .cloned()
            .ok_or(ServiceError::UnsupportedKind(kind))?;

        factory(config, timeout)
    }

    /// Registered kinds, sorted. The returned vector is the caller's own copy.
    pub fn supported_kinds(&self) -> Vec<ServiceKind> {
        {
            let inner = self.inner.read();
            if let Some(kinds) = &inner.kinds {
                return kinds.clone();
            }
        }

        let mut inner = self.inner.write();
        if let Some(kinds) = &inner.kinds {
            return kinds.clone();
        }
        let mut kinds: Vec<ServiceKind> = inner.factories.keys().copied().collect();
        kinds.sort();
        inner.kinds = Some(kinds.clone());
        kinds
    }

    pub fn is_supported(&self, kind: ServiceKind) -> bool {
        self.inner.read().factories.contains_key(&kind)
    }
}
