//! Persisted polling state for externally-executed workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// State the results tracker needs to ask an external engine
/// "is execution X done yet".
///
/// Persisted so tracker restarts re-seed the right queriers with every
/// in-flight poll instead of losing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub id: Uuid,
    /// The execution whose result is being polled.
    pub execution_id: Uuid,
    /// Identifier understood by the external engine.
    pub external_id: String,
    /// Querier module that owns this poll, e.g. `engines.cascade`.
    pub querier_name: String,
    /// Opaque context passed through to the querier on every poll.
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl QueryContext {
    pub fn new(
        execution_id: Uuid,
        external_id: impl Into<String>,
        querier_name: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            external_id: external_id.into(),
            querier_name: querier_name.into(),
            context,
            created_at: Utc::now(),
        }
    }
}
