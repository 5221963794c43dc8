//! # Capstan Configuration System
//!
//! Typed configuration for the execution core. All options come from YAML
//! files with environment-specific overlays; the loaded [`CapstanConfig`] is
//! split into per-component structs that are passed explicitly into each
//! component's constructor. There is no process-wide configuration
//! singleton: a component keeps only the options it needs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capstan_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected from CAPSTAN_ENV)
//! let manager = ConfigManager::load()?;
//! let scheduler_config = manager.config().scheduler.clone();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use loader::ConfigManager;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

/// Root configuration for the execution core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapstanConfig {
    pub scheduler: SchedulerConfig,
    pub policies: PolicyDefaults,
    pub results_tracker: ResultsTrackerConfig,
    pub garbage_collector: GarbageCollectorConfig,
    pub events: EventsConfig,
}

impl CapstanConfig {
    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.pool_size == 0 {
            return Err(ConfigurationError::Invalid {
                field: "scheduler.pool_size".to_string(),
                reason: "worker pool must allow at least one worker".to_string(),
            });
        }

        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                field: "scheduler.poll_interval_ms".to_string(),
                reason: "poll interval must be positive".to_string(),
            });
        }

        if self.results_tracker.retry_max_elapsed_ms < self.results_tracker.retry_initial_backoff_ms
        {
            return Err(ConfigurationError::Invalid {
                field: "results_tracker.retry_max_elapsed_ms".to_string(),
                reason: "maximum elapsed retry time must cover at least one backoff interval"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Configuration with short intervals suitable for tests.
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                poll_interval_ms: 10,
                claim_sweep_interval_ms: 50,
                stale_claim_threshold_ms: 500,
                policy_reschedule_delay_ms: 25,
                ..SchedulerConfig::default()
            },
            results_tracker: ResultsTrackerConfig {
                query_interval_ms: 10,
                empty_queue_sleep_ms: 10,
                retry_initial_backoff_ms: 5,
                retry_max_backoff_ms: 20,
                retry_max_elapsed_ms: 500,
            },
            garbage_collector: GarbageCollectorConfig {
                collection_interval_secs: 1,
                sleep_delay_ms: 1,
                startup_jitter_max_ms: 0,
                ..GarbageCollectorConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Options for the scheduling queue and scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long the scheduler loop sleeps between queue polls.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrently running scheduler workers.
    pub pool_size: usize,
    /// Cadence of the stale-claim sweep that releases queue entries claimed
    /// by a scheduler process that died mid-handling.
    pub claim_sweep_interval_ms: u64,
    /// A claimed queue entry older than this is considered stale and its
    /// claim is released so another scheduler can pick it up.
    pub stale_claim_threshold_ms: u64,
    /// Delay applied when a policy re-delays an execution and its queue
    /// entry is rescheduled.
    pub policy_reschedule_delay_ms: u64,
    /// Retry attempts for transient store failures in the queue handler.
    pub retry_max_attempt: u32,
    /// Fixed wait between those retries.
    pub retry_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            pool_size: 10,
            claim_sweep_interval_ms: 10_000,
            stale_claim_threshold_ms: 600_000,
            policy_reschedule_delay_ms: 2_500,
            retry_max_attempt: 10,
            retry_wait_ms: 3_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.claim_sweep_interval_ms)
    }
}

/// Defaults applied when a policy record omits a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    /// Concurrency threshold used when a concurrency policy does not
    /// specify one.
    pub concurrency_threshold: usize,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            concurrency_threshold: 1,
        }
    }
}

/// Options for the results tracker and its queriers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsTrackerConfig {
    /// Minimum interval between two polls of the same execution.
    pub query_interval_ms: u64,
    /// Sleep applied by a querier loop when it has nothing to poll.
    pub empty_queue_sleep_ms: u64,
    /// First backoff interval after a transient query failure.
    pub retry_initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff.
    pub retry_max_backoff_ms: u64,
    /// Total time budget for retrying one execution's poll before it is
    /// abandoned and the execution is force-failed.
    pub retry_max_elapsed_ms: u64,
}

impl Default for ResultsTrackerConfig {
    fn default() -> Self {
        Self {
            query_interval_ms: 1_000,
            empty_queue_sleep_ms: 5_000,
            retry_initial_backoff_ms: 500,
            retry_max_backoff_ms: 10_000,
            retry_max_elapsed_ms: 300_000,
        }
    }
}

/// Options for the garbage collector / timeout enforcer.
///
/// A zero threshold disables the corresponding sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GarbageCollectorConfig {
    /// How often a full collection pass runs.
    pub collection_interval_secs: u64,
    /// Sleep between sweep types within one pass.
    pub sleep_delay_ms: u64,
    /// Upper bound of the random startup delay that prevents a thundering
    /// herd when a fleet of collectors restarts together.
    pub startup_jitter_max_ms: u64,
    /// Workflows with no task activity for longer than this are orphaned
    /// and force-failed. Zero disables the sweep.
    pub workflow_execution_max_idle_secs: u64,
    /// Default time-to-live for pending inquiries that do not carry their
    /// own. Zero disables the inquiry sweep.
    pub inquiry_ttl_minutes: u64,
}

impl Default for GarbageCollectorConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: 600,
            sleep_delay_ms: 2_000,
            startup_jitter_max_ms: 3_000,
            workflow_execution_max_idle_secs: 0,
            inquiry_ttl_minutes: 1_440,
        }
    }
}

impl GarbageCollectorConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn orphan_sweep_enabled(&self) -> bool {
        self.workflow_execution_max_idle_secs > 0
    }

    pub fn inquiry_sweep_enabled(&self) -> bool {
        self.inquiry_ttl_minutes > 0
    }
}

/// Options for the in-process message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity before slow subscribers start lagging.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_000,
        }
    }
}
