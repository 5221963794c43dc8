//! Policy type registry.
//!
//! Policy implementations are looked up by type name at evaluation time.
//! A name that fails to resolve is remembered as failed and never retried,
//! so a misconfigured policy costs one lookup instead of one per claim.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{error, info};

use super::{ConcurrencyPolicy, PolicyError, PolicyResult, PolicyRule};
use crate::config::PolicyDefaults;

type PolicyFactory = Arc<dyn Fn() -> Arc<dyn PolicyRule> + Send + Sync>;

/// Mapping from policy type name to factory, populated at process start.
pub struct PolicyTypeRegistry {
    factories: DashMap<String, PolicyFactory>,
    failed_lookups: DashSet<String>,
}

impl PolicyTypeRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            failed_lookups: DashSet::new(),
        }
    }

    /// Registry pre-populated with the built-in policy types.
    pub fn with_builtins(defaults: PolicyDefaults) -> Self {
        let registry = Self::new();

        let for_plain = defaults.clone();
        registry.register("action.concurrency", move || {
            Arc::new(ConcurrencyPolicy::new(for_plain.clone()))
        });

        let for_attr = defaults;
        registry.register("action.concurrency.attr", move || {
            Arc::new(ConcurrencyPolicy::by_attributes(for_attr.clone()))
        });

        registry
    }

    pub fn register<F>(&self, policy_type: &str, factory: F)
    where
        F: Fn() -> Arc<dyn PolicyRule> + Send + Sync + 'static,
    {
        self.factories
            .insert(policy_type.to_string(), Arc::new(factory));
        self.failed_lookups.remove(policy_type);
        info!(policy_type = policy_type, "Registered policy type");
    }

    /// Resolve a policy type, caching failures permanently.
    pub fn get(&self, policy_type: &str) -> PolicyResult<Arc<dyn PolicyRule>> {
        if self.failed_lookups.contains(policy_type) {
            return Err(PolicyError::TypeUnavailable(policy_type.to_string()));
        }

        match self.factories.get(policy_type) {
            Some(factory) => Ok(factory()),
            None => {
                error!(
                    policy_type = policy_type,
                    "Unknown policy type, caching failed lookup"
                );
                self.failed_lookups.insert(policy_type.to_string());
                Err(PolicyError::TypeUnavailable(policy_type.to_string()))
            }
        }
    }
}

impl Default for PolicyTypeRegistry {
    fn default() -> Self {
        Self::with_builtins(PolicyDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types_resolve() {
        let registry = PolicyTypeRegistry::default();
        assert!(registry.get("action.concurrency").is_ok());
        assert!(registry.get("action.concurrency.attr").is_ok());
    }

    #[test]
    fn test_failed_lookup_is_cached() {
        let registry = PolicyTypeRegistry::default();
        assert!(registry.get("action.missing").is_err());
        assert!(registry.failed_lookups.contains("action.missing"));
        assert!(registry.get("action.missing").is_err());
    }

    #[test]
    fn test_late_registration_clears_failure() {
        let registry = PolicyTypeRegistry::default();
        assert!(registry.get("action.custom").is_err());

        registry.register("action.custom", || {
            Arc::new(ConcurrencyPolicy::new(PolicyDefaults::default()))
        });
        assert!(registry.get("action.custom").is_ok());
    }
}
