//! Garbage collector coverage: orphaned workflow detection, inquiry
//! timeouts, and the zero-disables sweep toggles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use capstan_core::config::GarbageCollectorConfig;
use capstan_core::garbage_collector::GarbageCollectorService;
use capstan_core::models::{ExecutionRequest, Inquiry, InquiryStatus};
use capstan_core::state_machine::{ExecutionStatus, WorkflowStatus};
use capstan_core::store::ExecutionStore;
use capstan_core::workflow::{TaskSpec, TaskTransition, TransitionCondition, WorkflowDefinition};

use common::{RunnerScript, TestPlatform};

fn gc_config() -> GarbageCollectorConfig {
    GarbageCollectorConfig {
        collection_interval_secs: 1,
        sleep_delay_ms: 1,
        startup_jitter_max_ms: 0,
        workflow_execution_max_idle_secs: 60,
        inquiry_ttl_minutes: 60,
    }
}

async fn insert_root(platform: &TestPlatform) -> Uuid {
    let mut root = ExecutionRequest::new("workflows.run");
    root.status = ExecutionStatus::Scheduled;
    platform.store.insert_execution(root).await.unwrap().id
}

/// Start a workflow whose single task holds in running forever, and wait
/// until the task has actually settled there so no late status event
/// refreshes the workflow's activity timestamp behind the test's back.
async fn start_stuck_workflow(platform: &TestPlatform) -> (Uuid, Uuid) {
    platform.runner.script("test.stuck", RunnerScript::Hold);

    let definition = WorkflowDefinition::new("tests.stuck").with_task(
        "stuck",
        TaskSpec {
            action: "test.stuck".to_string(),
            ..TaskSpec::default()
        },
    );

    let root_id = insert_root(platform).await;
    let workflow = platform
        .workflows
        .request(definition, root_id)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let tasks = platform
            .store
            .query_task_executions_for_workflow(workflow.id)
            .await
            .unwrap();
        if tasks
            .iter()
            .any(|task| task.status == ExecutionStatus::Running)
        {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    (workflow.id, root_id)
}

/// Scenario: with a 60s idle threshold, a workflow idle for 90s is
/// force-failed with an orphan diagnostic while one idle for 30s is left
/// untouched.
#[tokio::test]
async fn test_orphaned_workflow_is_force_failed() {
    let platform = TestPlatform::start().await;
    let gc = GarbageCollectorService::new(
        platform.service.clone(),
        Arc::clone(&platform.workflows),
        gc_config(),
    );

    let (orphan_id, orphan_root) = start_stuck_workflow(&platform).await;
    let (fresh_id, _) = start_stuck_workflow(&platform).await;

    // Backdate the orphan's activity past the threshold; the fresh one
    // stays recent.
    let mut orphan = platform.workflows.get(orphan_id).await.unwrap();
    orphan.last_task_activity = Utc::now() - chrono::Duration::seconds(90);
    platform
        .store
        .update_workflow_execution(&orphan)
        .await
        .unwrap();

    let mut fresh = platform.workflows.get(fresh_id).await.unwrap();
    fresh.last_task_activity = Utc::now() - chrono::Duration::seconds(30);
    platform
        .store
        .update_workflow_execution(&fresh)
        .await
        .unwrap();

    let purged = gc.purge_orphaned_workflow_executions().await.unwrap();
    assert_eq!(purged, 1);

    let orphan = platform
        .wait_for_workflow_status(orphan_id, WorkflowStatus::Failed, Duration::from_secs(2))
        .await;
    assert!(orphan.errors.iter().any(|error| {
        error.error_type == "platform" && error.message.contains("orphaned")
    }));

    // Operators can tell housekeeping failures from action failures.
    let root = platform
        .wait_for_execution_status(orphan_root, ExecutionStatus::Failed, Duration::from_secs(2))
        .await;
    let errors = root.result.unwrap()["errors"].clone();
    assert!(errors[0]["message"]
        .as_str()
        .unwrap()
        .contains("garbage collector"));

    let fresh = platform.workflows.get(fresh_id).await.unwrap();
    assert!(!fresh.status.is_terminal());

    platform.stop();
}

/// An expired pending inquiry is timed out and its workflow resumed so the
/// failure branch propagates; an unexpired one is untouched.
#[tokio::test]
async fn test_expired_inquiry_is_timed_out_and_workflow_resumed() {
    let platform = TestPlatform::start().await;
    let gc = GarbageCollectorService::new(
        platform.service.clone(),
        Arc::clone(&platform.workflows),
        gc_config(),
    );

    platform.runner.script("test.approval", RunnerScript::Hold);
    platform
        .runner
        .script("test.deploy", RunnerScript::Succeed(json!({})));

    let definition = WorkflowDefinition::new("tests.approval").with_task(
        "approval",
        TaskSpec {
            action: "test.approval".to_string(),
            next: vec![TaskTransition {
                when: TransitionCondition::OnSuccess,
                then: vec!["deploy".to_string()],
            }],
            ..TaskSpec::default()
        },
    )
    .with_task(
        "deploy",
        TaskSpec {
            action: "test.deploy".to_string(),
            ..TaskSpec::default()
        },
    );

    let root_id = insert_root(&platform).await;
    let workflow = platform
        .workflows
        .request(definition, root_id)
        .await
        .unwrap();

    // Wait for the approval step to hold in running, then pause the
    // workflow on it, which is how an inquiry parks.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let approval_execution = loop {
        let tasks = platform
            .store
            .query_task_executions_for_workflow(workflow.id)
            .await
            .unwrap();
        if let Some(task) = tasks
            .iter()
            .find(|t| t.status == ExecutionStatus::Running)
        {
            break task.execution_request_id.unwrap();
        }
        assert!(tokio::time::Instant::now() < deadline, "approval never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    platform.workflows.request_pause(workflow.id).await.unwrap();

    // One inquiry well past its TTL, one fresh.
    let mut expired = Inquiry::new(workflow.id, approval_execution, 60);
    expired.created_at = Utc::now() - chrono::Duration::minutes(90);
    platform.store.insert_inquiry(expired.clone()).await.unwrap();

    let fresh = Inquiry::new(workflow.id, Uuid::new_v4(), 60);
    platform.store.insert_inquiry(fresh.clone()).await.unwrap();

    let timed_out = gc.timeout_inquiries().await.unwrap();
    assert_eq!(timed_out, 1);

    let inquiries = platform.store.query_pending_inquiries().await.unwrap();
    assert_eq!(inquiries.len(), 1);
    assert_eq!(inquiries[0].id, fresh.id);

    // The approval execution was force-timed-out with a diagnostic.
    let approval = platform
        .wait_for_execution_status(
            approval_execution,
            ExecutionStatus::TimedOut,
            Duration::from_secs(2),
        )
        .await;
    assert!(approval.result.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("time to live"));

    // The resumed workflow takes its failure path: the timed-out approval
    // has no failure edge, so the workflow fails.
    platform
        .wait_for_workflow_status(workflow.id, WorkflowStatus::Failed, Duration::from_secs(3))
        .await;

    platform.stop();
}

/// Zero thresholds disable their sweeps entirely.
#[tokio::test]
async fn test_zero_thresholds_disable_sweeps() {
    let platform = TestPlatform::start().await;
    let gc = GarbageCollectorService::new(
        platform.service.clone(),
        Arc::clone(&platform.workflows),
        GarbageCollectorConfig {
            collection_interval_secs: 1,
            sleep_delay_ms: 1,
            startup_jitter_max_ms: 0,
            workflow_execution_max_idle_secs: 0,
            inquiry_ttl_minutes: 0,
        },
    );

    let (workflow_id, _) = start_stuck_workflow(&platform).await;
    let mut workflow = platform.workflows.get(workflow_id).await.unwrap();
    workflow.last_task_activity = Utc::now() - chrono::Duration::days(7);
    platform
        .store
        .update_workflow_execution(&workflow)
        .await
        .unwrap();

    let mut ancient = Inquiry::new(workflow_id, Uuid::new_v4(), 1);
    ancient.created_at = Utc::now() - chrono::Duration::days(7);
    platform.store.insert_inquiry(ancient).await.unwrap();

    gc.perform_garbage_collection().await;

    // Nothing was touched.
    let workflow = platform.workflows.get(workflow_id).await.unwrap();
    assert!(!workflow.status.is_terminal());
    assert_eq!(
        platform
            .store
            .query_pending_inquiries()
            .await
            .unwrap()
            .iter()
            .filter(|inquiry| inquiry.status == InquiryStatus::Pending)
            .count(),
        1
    );

    platform.stop();
}
