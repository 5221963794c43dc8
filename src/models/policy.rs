//! Admission-control policy records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What a concurrency policy does with an over-budget request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowAction {
    /// Re-enqueue the request with a backoff delay.
    Delay,
    /// Cancel the request with an explanatory result.
    Cancel,
}

impl Default for OverflowAction {
    fn default() -> Self {
        Self::Delay
    }
}

/// A declarative admission-control rule attached to an action.
///
/// Policies for one action are evaluated in the order they were registered,
/// which follows the config-declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    /// Action reference the policy applies to.
    pub action: String,
    /// Policy type resolved through the policy registry,
    /// e.g. `action.concurrency`.
    pub policy_type: String,
    pub enabled: bool,
    pub parameters: PolicyParameters,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        action: impl Into<String>,
        policy_type: impl Into<String>,
        parameters: PolicyParameters,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            action: action.into(),
            policy_type: policy_type.into(),
            enabled: true,
            parameters,
        }
    }
}

/// Parameters understood by the built-in policy types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyParameters {
    /// Maximum concurrent executions counted against the policy key.
    pub threshold: Option<usize>,
    /// What to do when the threshold is reached.
    pub action: OverflowAction,
    /// Parameter names whose values extend the concurrency key
    /// (concurrency-by-attributes).
    pub attributes: Vec<String>,
    /// Free-form parameters for custom policy types.
    pub extra: HashMap<String, Value>,
}
