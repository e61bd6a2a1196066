//! Traits for the external collaborators of the reconciliation core
//!
//! Persistence, configuration lookup and text similarity live outside this
//! crate. Implement these traits to plug the engine into a database or a
//! remote embedding service; `utils::memory_storage` provides in-memory
//! implementations for tests and development.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reconciliation::config::{ReconciliationConfig, ReconciliationPipeline};
use crate::types::*;

/// Selection of records fetched for one task run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolQuery {
    /// Tenant whose records are fetched
    pub company_id: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Restrict the pool to these record ids
    pub ids: Option<Vec<String>>,
}

impl PoolQuery {
    /// Whether a record falls inside the query
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        record.company_id == self.company_id
            && self.date_from.is_none_or(|from| record.date >= from)
            && self.date_to.is_none_or(|to| record.date <= to)
            && self
                .ids
                .as_ref()
                .is_none_or(|ids| ids.iter().any(|id| id == &record.id))
    }
}

/// Outcome of an atomic claim of a suggestion's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Every record was unmatched and is now matched by the claiming task
    Claimed,
    /// At least one record was already matched; nothing was changed
    Conflict { record_id: String, owner: Uuid },
}

/// Record persistence used by a reconciliation run
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch bank transactions selected by the query
    async fn fetch_bank_transactions(&self, query: &PoolQuery) -> ReconResult<Vec<LedgerRecord>>;

    /// Fetch journal entries selected by the query
    async fn fetch_journal_entries(&self, query: &PoolQuery) -> ReconResult<Vec<LedgerRecord>>;

    /// Atomically mark every record of the reconciliation as matched and
    /// persist it.
    ///
    /// The update is conditional: it succeeds only if all records are still
    /// unmatched. Otherwise nothing is written and `ClaimOutcome::Conflict`
    /// names the first record that was already claimed.
    async fn apply_reconciliation(
        &self,
        reconciliation: &Reconciliation,
    ) -> ReconResult<ClaimOutcome>;

    /// Count previously accepted reconciliations whose bank description is
    /// similar to the given one
    async fn count_similar_matches(&self, company_id: &str, description: &str)
        -> ReconResult<u32>;
}

/// Lookup of reconciliation configurations and pipelines
#[async_trait]
pub trait ConfigCatalog: Send + Sync {
    /// Get a configuration by ID
    async fn get_config(&self, config_id: &str) -> ReconResult<Option<ReconciliationConfig>>;

    /// Get a pipeline by ID
    async fn get_pipeline(&self, pipeline_id: &str)
        -> ReconResult<Option<ReconciliationPipeline>>;
}

/// Persistence of reconciliation tasks and their status transitions
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Save a new task
    async fn insert(&self, task: &ReconciliationTask) -> ReconResult<()>;

    /// Get a task by ID
    async fn get(&self, task_id: Uuid) -> ReconResult<Option<ReconciliationTask>>;

    /// Move a task from `from` to `to` if it is still in `from`.
    ///
    /// Returns `false` without changing anything when the task is in another
    /// state. Timestamps for running and terminal states are set here.
    async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus)
        -> ReconResult<bool>;

    /// Store the task's result, suggestions and error message.
    ///
    /// Status and timestamps only change through `transition`.
    async fn save(&self, task: &ReconciliationTask) -> ReconResult<()>;

    /// List tasks matching the query, newest first
    async fn list(&self, query: &TaskQuery) -> ReconResult<TaskPage>;
}

/// Semantic similarity of two text fields
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Similarity score in [0, 1]
    async fn similarity(&self, left: &str, right: &str) -> ReconResult<f64>;
}

/// Embedding service that knows nothing; every pair scores zero.
///
/// Useful when the embedding weight is zero or no service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmbedding;

#[async_trait]
impl EmbeddingService for NoopEmbedding {
    async fn similarity(&self, _left: &str, _right: &str) -> ReconResult<f64> {
        Ok(0.0)
    }
}
