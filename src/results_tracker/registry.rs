//! Querier registry.
//!
//! Queriers are resolved by name the first time an external engine type
//! needs polling. A name that fails to resolve is cached as failed and not
//! retried on every notification.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{error, info};

use super::querier::Querier;
use super::{TrackerError, TrackerResult};

type QuerierFactory = Arc<dyn Fn() -> Arc<dyn Querier> + Send + Sync>;

/// Mapping from external engine type name to querier factory.
pub struct QuerierRegistry {
    factories: DashMap<String, QuerierFactory>,
    failed_lookups: DashSet<String>,
}

impl QuerierRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            failed_lookups: DashSet::new(),
        }
    }

    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Querier> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self.failed_lookups.remove(name);
        info!(querier = name, "Registered querier");
    }

    /// Resolve a querier instance, caching failed lookups permanently.
    pub fn get(&self, name: &str) -> TrackerResult<Arc<dyn Querier>> {
        if self.failed_lookups.contains(name) {
            return Err(TrackerError::QuerierUnavailable(name.to_string()));
        }

        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => {
                error!(querier = name, "Unknown querier, caching failed lookup");
                self.failed_lookups.insert(name.to_string());
                Err(TrackerError::QuerierUnavailable(name.to_string()))
            }
        }
    }
}

impl Default for QuerierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
