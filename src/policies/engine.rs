//! Pre-run policy evaluation.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::{PolicyOutcome, PolicyRule, PolicyTypeRegistry};
use crate::error::Result;
use crate::models::ExecutionRequest;
use crate::services::ExecutionService;
use crate::state_machine::ExecutionStatus;
use crate::store::ExecutionStore;

/// Result of applying pre-run policies to one execution.
pub struct PolicyApplication {
    pub execution: ExecutionRequest,
    /// True when a policy re-delayed the execution during this evaluation.
    /// The scheduler distinguishes this from an execution that was already
    /// delayed and is now due, which stays runnable.
    pub delayed: bool,
}

/// Applies the policies attached to an action, in their declared order.
pub struct PolicyEngine {
    store: Arc<dyn ExecutionStore>,
    service: ExecutionService,
    registry: Arc<PolicyTypeRegistry>,
}

impl PolicyEngine {
    pub fn new(service: ExecutionService, registry: Arc<PolicyTypeRegistry>) -> Self {
        Self {
            store: service.store(),
            service,
            registry,
        }
    }

    /// Evaluate every enabled policy for the execution's action and apply
    /// the outcomes, returning the possibly-mutated execution.
    ///
    /// Each policy sees the record as left by the previous one. A policy
    /// that fails to resolve or to evaluate is skipped: deadlocking every
    /// execution over one buggy policy is worse than running slightly
    /// over budget.
    pub async fn apply_pre_run_policies(
        &self,
        mut execution: ExecutionRequest,
    ) -> Result<PolicyApplication> {
        let mut delayed = false;
        let policies = self.store.policies_for_action(&execution.action).await?;

        for policy in policies {
            let rule = match self.registry.get(&policy.policy_type) {
                Ok(rule) => rule,
                Err(error) => {
                    warn!(
                        policy = %policy.name,
                        policy_type = %policy.policy_type,
                        error = %error,
                        "Skipping unresolvable policy"
                    );
                    continue;
                }
            };

            let outcome = match rule
                .apply_before(self.store.as_ref(), &execution, &policy)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(
                        execution_id = %execution.id,
                        policy = %policy.name,
                        error = %error,
                        "Policy evaluation failed, treating as not applied"
                    );
                    continue;
                }
            };

            match outcome {
                PolicyOutcome::Proceed => {}
                PolicyOutcome::Delay => {
                    info!(
                        execution_id = %execution.id,
                        policy = %policy.name,
                        "Execution delayed by policy"
                    );
                    // The scheduler republishes the entry; the delayed
                    // status itself is not announced.
                    execution = self
                        .service
                        .update_status(execution.id, ExecutionStatus::Delayed, None, false)
                        .await?;
                    delayed = true;
                }
                PolicyOutcome::Cancel { reason } => {
                    info!(
                        execution_id = %execution.id,
                        policy = %policy.name,
                        reason = %reason,
                        "Execution canceled by policy"
                    );
                    execution = self
                        .service
                        .update_status(
                            execution.id,
                            ExecutionStatus::Canceled,
                            Some(json!({"error": reason})),
                            true,
                        )
                        .await?;
                }
            }
        }

        Ok(PolicyApplication { execution, delayed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyDefaults;
    use crate::events::InProcessBus;
    use crate::models::{OverflowAction, Policy, PolicyParameters};
    use crate::policies::{PolicyError, PolicyResult, PolicyRule};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct FailingPolicy;

    #[async_trait]
    impl PolicyRule for FailingPolicy {
        async fn apply_before(
            &self,
            _store: &dyn ExecutionStore,
            _execution: &ExecutionRequest,
            _policy: &Policy,
        ) -> PolicyResult<PolicyOutcome> {
            Err(PolicyError::EvaluationFailed("boom".to_string()))
        }
    }

    async fn engine_with_policies(policies: Vec<Policy>) -> (PolicyEngine, ExecutionService) {
        let store = Arc::new(InMemoryStore::new());
        for policy in policies {
            store.insert_policy(policy).await.unwrap();
        }
        let service = ExecutionService::new(store, Arc::new(InProcessBus::new(64)));
        let registry = Arc::new(PolicyTypeRegistry::with_builtins(PolicyDefaults::default()));
        registry.register("test.failing", || Arc::new(FailingPolicy));
        (PolicyEngine::new(service.clone(), registry), service)
    }

    fn concurrency_policy(name: &str, threshold: usize, action: OverflowAction) -> Policy {
        Policy::new(
            name,
            "pack.deploy",
            "action.concurrency",
            PolicyParameters {
                threshold: Some(threshold),
                action,
                ..PolicyParameters::default()
            },
        )
    }

    #[tokio::test]
    async fn test_no_policies_proceeds_unchanged() {
        let (engine, service) = engine_with_policies(vec![]).await;
        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();

        let after = engine.apply_pre_run_policies(execution).await.unwrap();
        assert!(!after.delayed);
        assert_eq!(after.execution.status, ExecutionStatus::Requested);
    }

    #[tokio::test]
    async fn test_failing_policy_fails_open() {
        let (engine, service) = engine_with_policies(vec![
            Policy::new(
                "broken",
                "pack.deploy",
                "test.failing",
                PolicyParameters::default(),
            ),
            concurrency_policy("limit", 0, OverflowAction::Cancel),
        ])
        .await;

        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();

        // The broken policy is skipped; the zero-slot concurrency policy
        // after it still cancels.
        let after = engine.apply_pre_run_policies(execution).await.unwrap();
        assert_eq!(after.execution.status, ExecutionStatus::Canceled);
        assert!(after.execution.result.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("concurrency"));
    }

    #[tokio::test]
    async fn test_unknown_policy_type_skipped() {
        let (engine, service) = engine_with_policies(vec![Policy::new(
            "ghost",
            "pack.deploy",
            "action.unknown",
            PolicyParameters::default(),
        )])
        .await;

        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();
        let after = engine.apply_pre_run_policies(execution).await.unwrap();
        assert_eq!(after.execution.status, ExecutionStatus::Requested);
    }

    #[tokio::test]
    async fn test_over_threshold_delays() {
        let (engine, service) =
            engine_with_policies(vec![concurrency_policy("limit", 1, OverflowAction::Delay)]).await;

        let mut running = ExecutionRequest::new("pack.deploy");
        running.status = ExecutionStatus::Running;
        service.store().insert_execution(running).await.unwrap();

        let execution = service
            .request(ExecutionRequest::new("pack.deploy"))
            .await
            .unwrap();
        let after = engine.apply_pre_run_policies(execution).await.unwrap();
        assert!(after.delayed);
        assert_eq!(after.execution.status, ExecutionStatus::Delayed);
    }
}
