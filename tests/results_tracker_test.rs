//! Results tracker coverage: polling, retry backoff, budget exhaustion,
//! bootstrap re-seeding, and querier resolution.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use capstan_core::config::ResultsTrackerConfig;
use capstan_core::models::{ExecutionRequest, QueryContext};
use capstan_core::results_tracker::{
    Querier, QuerierError, QuerierRegistry, QuerierResult, ResultsTracker,
};
use capstan_core::state_machine::ExecutionStatus;
use capstan_core::store::ExecutionStore;

use common::TestPlatform;

/// Querier that fails transiently a fixed number of times, then reports
/// the scripted outcome.
struct FlakyQuerier {
    failures_before_success: usize,
    attempts: AtomicUsize,
    outcome: (ExecutionStatus, Value),
}

impl FlakyQuerier {
    fn new(failures: usize, outcome: (ExecutionStatus, Value)) -> Self {
        Self {
            failures_before_success: failures,
            attempts: AtomicUsize::new(0),
            outcome,
        }
    }
}

#[async_trait]
impl Querier for FlakyQuerier {
    async fn query(
        &self,
        _external_id: &str,
        _context: &Value,
    ) -> QuerierResult<(ExecutionStatus, Value)> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            return Err(QuerierError::Transient(format!(
                "engine unreachable (attempt {attempt})"
            )));
        }
        Ok(self.outcome.clone())
    }
}

/// Querier that always fails transiently.
struct DeadQuerier;

#[async_trait]
impl Querier for DeadQuerier {
    async fn query(
        &self,
        _external_id: &str,
        _context: &Value,
    ) -> QuerierResult<(ExecutionStatus, Value)> {
        Err(QuerierError::Transient("engine is down".to_string()))
    }
}

fn tracker_config() -> ResultsTrackerConfig {
    ResultsTrackerConfig {
        query_interval_ms: 10,
        empty_queue_sleep_ms: 10,
        retry_initial_backoff_ms: 5,
        retry_max_backoff_ms: 20,
        retry_max_elapsed_ms: 400,
    }
}

async fn running_execution(platform: &TestPlatform) -> Uuid {
    let mut execution = ExecutionRequest::new("cascade.workflow");
    execution.status = ExecutionStatus::Running;
    platform
        .store
        .insert_execution(execution)
        .await
        .unwrap()
        .id
}

/// Scenario: three transient failures, success on the fourth attempt
/// within the retry budget; the execution succeeds with the fetched
/// output and the persisted query state is cleared.
#[tokio::test]
async fn test_poll_recovers_from_transient_failures() {
    let platform = TestPlatform::start().await;
    let (_tx, shutdown_rx) = watch::channel(false);

    let attempts: Arc<FlakyQuerier> = Arc::new(FlakyQuerier::new(
        3,
        (ExecutionStatus::Succeeded, json!({"report": "all green"})),
    ));

    let registry = Arc::new(QuerierRegistry::new());
    let querier = Arc::clone(&attempts);
    registry.register("engines.cascade", move || {
        Arc::clone(&querier) as Arc<dyn Querier>
    });

    let tracker = ResultsTracker::new(
        platform.service.clone(),
        registry,
        tracker_config(),
        shutdown_rx,
    );

    let execution_id = running_execution(&platform).await;
    tracker
        .add_query(QueryContext::new(
            execution_id,
            "wf-123",
            "engines.cascade",
            json!({"tenant": "acme"}),
        ))
        .await
        .unwrap();

    let done = platform
        .wait_for_execution_status(execution_id, ExecutionStatus::Succeeded, Duration::from_secs(3))
        .await;
    assert_eq!(done.result.unwrap()["report"], json!("all green"));
    assert_eq!(attempts.attempts.load(Ordering::SeqCst), 4);

    // Completed polls drop their persisted state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        if platform.store.list_query_contexts().await.unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "query state not cleared");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    platform.stop();
}

/// The retry budget bounds transient retries: exhaustion force-fails the
/// execution with a polling diagnostic.
#[tokio::test]
async fn test_retry_budget_exhaustion_fails_execution() {
    let platform = TestPlatform::start().await;
    let (_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(QuerierRegistry::new());
    registry.register("engines.cascade", || Arc::new(DeadQuerier) as Arc<dyn Querier>);

    let tracker = ResultsTracker::new(
        platform.service.clone(),
        registry,
        tracker_config(),
        shutdown_rx,
    );

    let execution_id = running_execution(&platform).await;
    tracker
        .add_query(QueryContext::new(
            execution_id,
            "wf-456",
            "engines.cascade",
            Value::Null,
        ))
        .await
        .unwrap();

    let failed = platform
        .wait_for_execution_status(execution_id, ExecutionStatus::Failed, Duration::from_secs(5))
        .await;

    let diagnostic = failed.result.unwrap();
    let message = diagnostic["error"].as_str().unwrap().to_string();
    assert!(message.contains("Giving up polling"), "got: {message}");
    assert_eq!(diagnostic["querier"], json!("engines.cascade"));

    platform.stop();
}

/// A canceled execution is never flipped back by a late poll result, but
/// the fetched output is still recorded.
#[tokio::test]
async fn test_late_poll_result_does_not_overwrite_cancel() {
    let platform = TestPlatform::start().await;
    let (_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(QuerierRegistry::new());
    registry.register("engines.cascade", || {
        Arc::new(FlakyQuerier::new(
            0,
            (ExecutionStatus::Succeeded, json!({"late": true})),
        )) as Arc<dyn Querier>
    });

    let tracker = ResultsTracker::new(
        platform.service.clone(),
        registry,
        tracker_config(),
        shutdown_rx,
    );

    let execution_id = running_execution(&platform).await;

    // The user cancels before the poll lands.
    platform
        .service
        .update_status(execution_id, ExecutionStatus::Canceling, None, true)
        .await
        .unwrap();
    platform
        .service
        .update_status(execution_id, ExecutionStatus::Canceled, None, true)
        .await
        .unwrap();

    tracker
        .add_query(QueryContext::new(
            execution_id,
            "wf-789",
            "engines.cascade",
            Value::Null,
        ))
        .await
        .unwrap();

    // The poll resolves and clears its state without resurrecting the
    // execution.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if platform.store.list_query_contexts().await.unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "query state not cleared");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let execution = platform.service.get(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.result.unwrap()["late"], json!(true));

    platform.stop();
}

/// Bootstrap re-seeds every persisted query context into its querier, so
/// tracker restarts lose no in-flight polls.
#[tokio::test]
async fn test_bootstrap_reseeds_persisted_contexts() {
    let platform = TestPlatform::start().await;
    let (_tx, shutdown_rx) = watch::channel(false);

    let execution_a = running_execution(&platform).await;
    let execution_b = running_execution(&platform).await;

    // Contexts persisted by a previous tracker process.
    for (execution_id, external_id) in [(execution_a, "wf-a"), (execution_b, "wf-b")] {
        platform
            .store
            .insert_query_context(QueryContext::new(
                execution_id,
                external_id,
                "engines.cascade",
                Value::Null,
            ))
            .await
            .unwrap();
    }

    let registry = Arc::new(QuerierRegistry::new());
    registry.register("engines.cascade", || {
        Arc::new(FlakyQuerier::new(
            0,
            (ExecutionStatus::Succeeded, json!({"recovered": true})),
        )) as Arc<dyn Querier>
    });

    let tracker = ResultsTracker::new(
        platform.service.clone(),
        registry,
        tracker_config(),
        shutdown_rx,
    );

    let seeded = tracker.bootstrap().await.unwrap();
    assert_eq!(seeded, 2);

    for execution_id in [execution_a, execution_b] {
        platform
            .wait_for_execution_status(
                execution_id,
                ExecutionStatus::Succeeded,
                Duration::from_secs(3),
            )
            .await;
    }

    platform.stop();
}

/// A querier that cannot be resolved is remembered as failed; contexts for
/// it stay persisted instead of being dropped.
#[tokio::test]
async fn test_unknown_querier_is_cached_and_context_kept() {
    let platform = TestPlatform::start().await;
    let (_tx, shutdown_rx) = watch::channel(false);

    let tracker = ResultsTracker::new(
        platform.service.clone(),
        Arc::new(QuerierRegistry::new()),
        tracker_config(),
        shutdown_rx,
    );

    let execution_id = running_execution(&platform).await;
    let result = tracker
        .add_query(QueryContext::new(
            execution_id,
            "wf-000",
            "engines.missing",
            Value::Null,
        ))
        .await;
    assert!(result.is_err());

    // The context survives for a later bootstrap once the querier exists.
    assert_eq!(platform.store.list_query_contexts().await.unwrap().len(), 1);
    assert_eq!(tracker.pending_count(), 0);

    platform.stop();
}
