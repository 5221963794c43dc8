//! Shared integration test harness.
//!
//! Builds the full in-process platform: record store, bus, scheduling
//! queue, scheduler loops, workflow engine, and a scripted runner, wired
//! the way a deployment wires the real components.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use capstan_core::config::{CapstanConfig, PolicyDefaults};
use capstan_core::events::{InProcessBus, MessageBus};
use capstan_core::models::{ExecutionRequest, WorkflowExecution};
use capstan_core::policies::{PolicyEngine, PolicyTypeRegistry};
use capstan_core::runner::{DispatchResult, RunnerDispatch};
use capstan_core::scheduler::{SchedulerEntrypoint, SchedulerHandler, SchedulingQueue};
use capstan_core::services::ExecutionService;
use capstan_core::state_machine::{ExecutionStatus, WorkflowStatus};
use capstan_core::store::{ExecutionStore, InMemoryStore};
use capstan_core::workflow::{WorkflowExecutionHandler, WorkflowService};

/// What the scripted runner does with a dispatched action.
#[derive(Debug, Clone)]
pub enum RunnerScript {
    /// Report running, then succeeded with the given result.
    Succeed(Value),
    /// Report running, then failed with the given result.
    Fail(Value),
    /// Report running and stay there until the test resolves it.
    Hold,
}

/// Runner double that reports through the same status-update path real
/// runners use.
pub struct ScriptedRunner {
    service: ExecutionService,
    scripts: DashMap<String, RunnerScript>,
}

impl ScriptedRunner {
    pub fn new(service: ExecutionService) -> Self {
        Self {
            service,
            scripts: DashMap::new(),
        }
    }

    pub fn script(&self, action: &str, script: RunnerScript) {
        self.scripts.insert(action.to_string(), script);
    }
}

#[async_trait]
impl RunnerDispatch for ScriptedRunner {
    async fn dispatch(&self, execution: &ExecutionRequest) -> DispatchResult<()> {
        let script = self
            .scripts
            .get(&execution.action)
            .map(|entry| entry.value().clone())
            .unwrap_or(RunnerScript::Succeed(json!({})));

        let service = self.service.clone();
        let execution_id = execution.id;

        tokio::spawn(async move {
            let _ = service
                .update_status(execution_id, ExecutionStatus::Running, None, true)
                .await;

            match script {
                RunnerScript::Succeed(result) => {
                    let _ = service
                        .update_status(execution_id, ExecutionStatus::Succeeded, Some(result), true)
                        .await;
                }
                RunnerScript::Fail(result) => {
                    let _ = service
                        .update_status(execution_id, ExecutionStatus::Failed, Some(result), true)
                        .await;
                }
                RunnerScript::Hold => {}
            }
        });

        Ok(())
    }
}

/// The assembled in-process platform.
pub struct TestPlatform {
    pub store: Arc<InMemoryStore>,
    pub bus: Arc<InProcessBus>,
    pub service: ExecutionService,
    pub queue: Arc<SchedulingQueue>,
    pub workflows: Arc<WorkflowService>,
    pub runner: Arc<ScriptedRunner>,
    shutdown_tx: watch::Sender<bool>,
}

impl TestPlatform {
    /// Build and start scheduler entrypoint, scheduler loop, and workflow
    /// engine with test-profile intervals.
    pub async fn start() -> Self {
        let config = CapstanConfig::for_testing();

        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InProcessBus::new(config.events.channel_capacity));
        let service = ExecutionService::new(
            Arc::clone(&store) as Arc<dyn ExecutionStore>,
            Arc::clone(&bus) as Arc<dyn MessageBus>,
        );

        let queue = Arc::new(SchedulingQueue::new(service.clone()));
        let registry = Arc::new(PolicyTypeRegistry::with_builtins(PolicyDefaults::default()));
        let policy_engine = Arc::new(PolicyEngine::new(service.clone(), registry));
        let runner = Arc::new(ScriptedRunner::new(service.clone()));
        let workflows = Arc::new(WorkflowService::new(service.clone(), Arc::clone(&queue)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let entrypoint = SchedulerEntrypoint::new(
            Arc::clone(&queue),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            config.scheduler.clone(),
        );
        let entrypoint_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { entrypoint.run(entrypoint_shutdown).await });

        let handler = Arc::new(SchedulerHandler::new(
            Arc::clone(&queue),
            service.clone(),
            policy_engine,
            Arc::clone(&runner) as Arc<dyn RunnerDispatch>,
            config.scheduler.clone(),
        ));
        tokio::spawn(Arc::clone(&handler).run(shutdown_rx.clone()));
        tokio::spawn(Arc::clone(&handler).run_claim_sweep(shutdown_rx.clone()));

        let engine = WorkflowExecutionHandler::new(
            service.clone(),
            Arc::clone(&workflows),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
        );
        let engine_shutdown = shutdown_rx;
        tokio::spawn(async move { engine.run(engine_shutdown).await });

        // Let the consumer loops subscribe before any test publishes.
        tokio::time::sleep(Duration::from_millis(25)).await;

        Self {
            store,
            bus,
            service,
            queue,
            workflows,
            runner,
            shutdown_tx,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Poll the store until the execution reaches the status or the
    /// timeout expires.
    pub async fn wait_for_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        timeout: Duration,
    ) -> ExecutionRequest {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let execution = self
                .service
                .get(execution_id)
                .await
                .expect("execution exists");
            if execution.status == status {
                return execution;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "execution {execution_id} never reached {status}, last seen {}",
                    execution.status
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll the store until the workflow reaches the status or the timeout
    /// expires.
    pub async fn wait_for_workflow_status(
        &self,
        workflow_execution_id: Uuid,
        status: WorkflowStatus,
        timeout: Duration,
    ) -> WorkflowExecution {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let workflow = self
                .workflows
                .get(workflow_execution_id)
                .await
                .expect("workflow exists");
            if workflow.status == status {
                return workflow;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "workflow {workflow_execution_id} never reached {status}, last seen {}",
                    workflow.status
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
