//! Concurrency limit policies.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{PolicyOutcome, PolicyResult, PolicyRule};
use crate::config::PolicyDefaults;
use crate::models::{ExecutionRequest, OverflowAction, Policy};
use crate::state_machine::status_groups;
use crate::store::{ExecutionFilter, ExecutionStore};

/// Limits how many executions of one action run at the same time.
///
/// In attribute-keyed mode the count is additionally grouped by the values
/// of selected input parameters, so e.g. deploys to different clusters do
/// not contend for the same slots.
pub struct ConcurrencyPolicy {
    defaults: PolicyDefaults,
    by_attributes: bool,
}

impl ConcurrencyPolicy {
    pub fn new(defaults: PolicyDefaults) -> Self {
        Self {
            defaults,
            by_attributes: false,
        }
    }

    pub fn by_attributes(defaults: PolicyDefaults) -> Self {
        Self {
            defaults,
            by_attributes: true,
        }
    }

    fn build_filter(&self, execution: &ExecutionRequest, policy: &Policy) -> ExecutionFilter {
        let mut filter = ExecutionFilter::for_action(&policy.action)
            .with_statuses(status_groups::CONCURRENCY_STATES);

        if self.by_attributes {
            for attribute in &policy.parameters.attributes {
                let value = execution
                    .parameters
                    .get(attribute)
                    .cloned()
                    .unwrap_or(Value::Null);
                filter = filter.with_parameter(attribute.clone(), value);
            }
        }

        filter
    }
}

#[async_trait]
impl PolicyRule for ConcurrencyPolicy {
    async fn apply_before(
        &self,
        store: &dyn ExecutionStore,
        execution: &ExecutionRequest,
        policy: &Policy,
    ) -> PolicyResult<PolicyOutcome> {
        let threshold = policy
            .parameters
            .threshold
            .unwrap_or(self.defaults.concurrency_threshold);

        let filter = self.build_filter(execution, policy);
        let in_flight = store.count_executions(&filter).await?;

        debug!(
            execution_id = %execution.id,
            policy = %policy.name,
            in_flight = in_flight,
            threshold = threshold,
            "Evaluated concurrency policy"
        );

        if in_flight < threshold {
            return Ok(PolicyOutcome::Proceed);
        }

        match policy.parameters.action {
            OverflowAction::Delay => Ok(PolicyOutcome::Delay),
            OverflowAction::Cancel => Ok(PolicyOutcome::Cancel {
                reason: format!(
                    "Canceled by policy \"{}\": {} of {} concurrency slots for action \"{}\" in use",
                    policy.name, in_flight, threshold, policy.action
                ),
            }),
        }
    }
}
