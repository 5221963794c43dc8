#![allow(clippy::doc_markdown)] // Allow technical terms like YAML, JoinSet in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Capstan Core
//!
//! Execution scheduling and workflow orchestration core for the Capstan
//! event-driven automation platform.
//!
//! ## Overview
//!
//! Capstan turns a request to run an automation (a single action or a
//! workflow of dependent tasks) into a correctly ordered, policy-constrained,
//! fault-tolerant sequence of scheduled executions and tracks each execution
//! through a well-defined lifecycle until completion, including workflows
//! whose completion is detected asynchronously by polling external engines.
//!
//! ## Architecture
//!
//! The core follows a **store-coordinated architecture**: the execution
//! record store is the single source of truth, every component communicates
//! state changes by writing records and publishing bus notifications, and
//! the scheduler, workflow engine, results tracker, and garbage collector
//! run as independent long-lived loops that can be scaled separately.
//!
//! ## Core Components
//!
//! - **SchedulingQueue**: durable, time-aware queue of not-yet-dispatched
//!   executions with idempotent enqueue and at-most-once claim semantics
//! - **SchedulerHandler**: polls the queue, applies admission-control
//!   policies, and dispatches runnable work to the runner seam
//! - **PolicyEngine**: evaluates pre-run policies (concurrency limits) with
//!   fail-open error handling
//! - **WorkflowConductor**: advances a task dependency graph through its
//!   lifecycle, including join synchronization and pause/cancel propagation
//! - **ResultsTracker**: polls externally-executed workflows for completion
//!   through pluggable queriers
//! - **GarbageCollectorService**: force-resolves orphaned workflows and
//!   expired inquiries
//!
//! ## Module Organization
//!
//! - [`models`] - Execution, workflow, task, policy, and inquiry records
//! - [`store`] - Record store trait and the in-memory reference backend
//! - [`events`] - Message bus trait, topics, and in-process publisher
//! - [`state_machine`] - Execution and workflow status state machines
//! - [`services`] - Shared execution lifecycle services
//! - [`scheduler`] - Scheduling queue, entrypoint, and scheduler loop
//! - [`policies`] - Admission-control policy engine and built-in policies
//! - [`workflow`] - Workflow definitions, conductor, and orchestration glue
//! - [`results_tracker`] - Querier plugins and the polling tracker
//! - [`garbage_collector`] - Orphan and inquiry timeout enforcement
//! - [`config`] - Typed configuration loading
//! - [`error`] - Structured error handling

pub mod config;
pub mod error;
pub mod events;
pub mod garbage_collector;
pub mod logging;
pub mod models;
pub mod policies;
pub mod results_tracker;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod state_machine;
pub mod store;
pub mod workflow;

pub use config::{
    CapstanConfig, EventsConfig, GarbageCollectorConfig, PolicyDefaults, ResultsTrackerConfig,
    SchedulerConfig,
};
pub use error::{CapstanError, Result};
pub use events::{topics, BusMessage, InProcessBus, MessageBus};
pub use models::{
    ExecutionContext, ExecutionRequest, Inquiry, Policy, QueryContext, ScheduleQueueEntry,
    TaskExecution, WorkflowExecution,
};
pub use runner::RunnerDispatch;
pub use state_machine::{ExecutionStatus, WorkflowStatus};
pub use store::{ExecutionStore, InMemoryStore, StoreError};
