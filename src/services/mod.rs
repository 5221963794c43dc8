//! Shared lifecycle services used by every component.

pub mod executions;

pub use executions::ExecutionService;
