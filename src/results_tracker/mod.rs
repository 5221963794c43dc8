//! # Results Tracker
//!
//! Workflows executed by an external engine cannot push completion events
//! into the platform, so the tracker polls. Each external engine type has a
//! [`Querier`] with its own polling loop; the tracker routes persisted and
//! newly-announced query contexts to the right querier and re-seeds every
//! in-flight poll from the store on startup, so a tracker restart loses
//! nothing.

pub mod querier;
pub mod registry;

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::config::ResultsTrackerConfig;
use crate::error::Result;
use crate::events::{topics, BusMessage, MessageBus};
use crate::models::QueryContext;
use crate::services::ExecutionService;
use crate::store::ExecutionStore;

pub use querier::{Querier, QuerierError, QuerierHandle, QuerierResult};
pub use registry::QuerierRegistry;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Querier {0} is not available")]
    QuerierUnavailable(String),

    #[error("Malformed polling notification: {0}")]
    MalformedNotification(String),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Routes query contexts to queriers and supervises their polling loops.
pub struct ResultsTracker {
    service: ExecutionService,
    store: Arc<dyn ExecutionStore>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<QuerierRegistry>,
    config: ResultsTrackerConfig,
    handles: DashMap<String, Arc<QuerierHandle>>,
    shutdown: watch::Receiver<bool>,
}

impl ResultsTracker {
    pub fn new(
        service: ExecutionService,
        registry: Arc<QuerierRegistry>,
        config: ResultsTrackerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store: service.store(),
            bus: service.bus(),
            service,
            registry,
            config,
            handles: DashMap::new(),
            shutdown,
        }
    }

    /// Reload every persisted query context and distribute them to their
    /// queriers. Contexts whose querier cannot be resolved are left in the
    /// store and logged.
    pub async fn bootstrap(&self) -> Result<usize> {
        let contexts = self.store.list_query_contexts().await?;
        let total = contexts.len();
        let mut seeded = 0;

        for context in contexts {
            match self.route(context) {
                Ok(()) => seeded += 1,
                Err(error) => {
                    warn!(error = %error, "Skipping persisted query context during bootstrap");
                }
            }
        }

        info!(seeded = seeded, total = total, "Results tracker bootstrapped");
        Ok(seeded)
    }

    /// Persist a new query context and start polling it.
    pub async fn add_query(&self, context: QueryContext) -> Result<()> {
        let context = self.store.insert_query_context(context).await?;
        self.route(context)?;
        Ok(())
    }

    /// Consume "needs polling" notifications until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut receiver = self.bus.subscribe();
        info!("Results tracker started");

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Ok(message) => {
                        if message.topic != topics::EXECUTION_POLLING_REQUESTED {
                            continue;
                        }
                        if let Err(error) = self.handle_notification(&message).await {
                            error!(error = %error, "Failed to process polling notification");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Results tracker lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Bus closed, stopping results tracker");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Results tracker shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_notification(&self, message: &BusMessage) -> Result<()> {
        let context: QueryContext = serde_json::from_value(message.payload.clone())
            .map_err(|error| TrackerError::MalformedNotification(error.to_string()))?;
        self.add_query(context).await
    }

    /// Hand a context to its querier, creating and spawning the querier's
    /// polling loop on first use.
    fn route(&self, context: QueryContext) -> TrackerResult<()> {
        let handle = match self.handles.get(&context.querier_name) {
            Some(handle) => Arc::clone(&handle),
            None => {
                let querier = self.registry.get(&context.querier_name)?;
                let handle = Arc::new(QuerierHandle::new(
                    context.querier_name.clone(),
                    querier,
                    self.service.clone(),
                    self.config.clone(),
                ));
                self.handles
                    .insert(context.querier_name.clone(), Arc::clone(&handle));

                tokio::spawn(Arc::clone(&handle).run(self.shutdown.clone()));
                handle
            }
        };

        handle.add_queries(vec![context]);
        Ok(())
    }

    /// Number of polls currently tracked across all queriers.
    pub fn pending_count(&self) -> usize {
        self.handles
            .iter()
            .map(|entry| entry.pending_count())
            .sum()
    }
}
