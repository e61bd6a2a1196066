//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::reconciliation::config::{ReconciliationConfig, ReconciliationPipeline};
use crate::reconciliation::scoring::text_overlap;
use crate::traits::*;
use crate::types::*;

/// Token overlap at which two bank descriptions count as similar
pub const SIMILAR_DESCRIPTION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Default)]
struct RecordTables {
    bank: HashMap<String, LedgerRecord>,
    book: HashMap<String, LedgerRecord>,
    reconciliations: Vec<Reconciliation>,
}

impl RecordTables {
    fn side(&self, side: Side) -> &HashMap<String, LedgerRecord> {
        match side {
            Side::Bank => &self.bank,
            Side::Book => &self.book,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<String, LedgerRecord> {
        match side {
            Side::Bank => &mut self.bank,
            Side::Book => &mut self.book,
        }
    }
}

/// In-memory record store and config catalog for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<RecordTables>>,
    configs: Arc<RwLock<HashMap<String, ReconciliationConfig>>>,
    pipelines: Arc<RwLock<HashMap<String, ReconciliationPipeline>>>,
    failing_fetches: Arc<AtomicU32>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record
    pub async fn add_record(&self, record: LedgerRecord) {
        let mut tables = self.tables.write().await;
        tables.side_mut(record.side).insert(record.id.clone(), record);
    }

    pub async fn add_config(&self, config: ReconciliationConfig) {
        self.configs.write().await.insert(config.id.clone(), config);
    }

    pub async fn add_pipeline(&self, pipeline: ReconciliationPipeline) {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id.clone(), pipeline);
    }

    /// Get a record by side and ID
    pub async fn record(&self, side: Side, id: &str) -> Option<LedgerRecord> {
        self.tables.read().await.side(side).get(id).cloned()
    }

    /// All applied reconciliations, oldest first
    pub async fn reconciliations(&self) -> Vec<Reconciliation> {
        self.tables.read().await.reconciliations.clone()
    }

    /// Make the next `count` pool fetches fail with a transient error
    pub fn fail_next_fetches(&self, count: u32) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Clear all data (useful for testing)
    pub async fn clear(&self) {
        *self.tables.write().await = RecordTables::default();
        self.configs.write().await.clear();
        self.pipelines.write().await.clear();
    }

    fn take_injected_failure(&self) -> ReconResult<()> {
        let injected = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(ReconError::external("record-store", "injected fetch failure")),
            Err(_) => Ok(()),
        }
    }

    async fn fetch(&self, side: Side, query: &PoolQuery) -> ReconResult<Vec<LedgerRecord>> {
        self.take_injected_failure()?;
        let tables = self.tables.read().await;
        let mut records: Vec<LedgerRecord> = tables
            .side(side)
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for MemoryStorage {
    async fn fetch_bank_transactions(&self, query: &PoolQuery) -> ReconResult<Vec<LedgerRecord>> {
        self.fetch(Side::Bank, query).await
    }

    async fn fetch_journal_entries(&self, query: &PoolQuery) -> ReconResult<Vec<LedgerRecord>> {
        self.fetch(Side::Book, query).await
    }

    async fn apply_reconciliation(
        &self,
        reconciliation: &Reconciliation,
    ) -> ReconResult<ClaimOutcome> {
        let mut tables = self.tables.write().await;

        let members: Vec<(Side, &String)> = reconciliation
            .bank_transaction_ids
            .iter()
            .map(|id| (Side::Bank, id))
            .chain(
                reconciliation
                    .journal_entry_ids
                    .iter()
                    .map(|id| (Side::Book, id)),
            )
            .collect();

        // Check every record before touching any of them
        for (side, id) in &members {
            let record = tables
                .side(*side)
                .get(*id)
                .ok_or_else(|| ReconError::NotFound(format!("{} record '{}'", side, id)))?;
            if let MatchStatus::Matched { task_id } = record.status {
                return Ok(ClaimOutcome::Conflict {
                    record_id: (*id).clone(),
                    owner: task_id,
                });
            }
        }

        for (side, id) in &members {
            if let Some(record) = tables.side_mut(*side).get_mut(*id) {
                record.status = MatchStatus::Matched {
                    task_id: reconciliation.task_id,
                };
            }
        }
        tables.reconciliations.push(reconciliation.clone());
        Ok(ClaimOutcome::Claimed)
    }

    async fn count_similar_matches(&self, company_id: &str, description: &str) -> ReconResult<u32> {
        let tables = self.tables.read().await;
        let count = tables
            .reconciliations
            .iter()
            .filter(|r| r.company_id == company_id)
            .filter(|r| {
                r.bank_transaction_ids.iter().any(|id| {
                    tables.bank.get(id).is_some_and(|bank| {
                        text_overlap(&bank.description, description) >= SIMILAR_DESCRIPTION_THRESHOLD
                    })
                })
            })
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl ConfigCatalog for MemoryStorage {
    async fn get_config(&self, config_id: &str) -> ReconResult<Option<ReconciliationConfig>> {
        Ok(self.configs.read().await.get(config_id).cloned())
    }

    async fn get_pipeline(&self, pipeline_id: &str) -> ReconResult<Option<ReconciliationPipeline>> {
        Ok(self.pipelines.read().await.get(pipeline_id).cloned())
    }
}

/// In-memory task store
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, ReconciliationTask>>>,
}

impl MemoryTaskStore {
    /// Create a new task store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &ReconciliationTask) -> ReconResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(ReconError::Storage(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> ReconResult<Option<ReconciliationTask>> {
        Ok(self.tasks.read().await.get(&task_id).cloned())
    }

    async fn transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> ReconResult<bool> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or_else(|| ReconError::NotFound(format!("task {}", task_id)))?;

        if task.status != from || !from.can_transition_to(to) {
            return Ok(false);
        }

        let now = chrono::Utc::now().naive_utc();
        task.status = to;
        if to == TaskStatus::Running {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.finished_at = Some(now);
        }
        Ok(true)
    }

    async fn save(&self, task: &ReconciliationTask) -> ReconResult<()> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| ReconError::NotFound(format!("task {}", task.id)))?;
        stored.result = task.result.clone();
        stored.suggestions = task.suggestions.clone();
        stored.error_message = task.error_message.clone();
        Ok(())
    }

    async fn list(&self, query: &TaskQuery) -> ReconResult<TaskPage> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<&ReconciliationTask> =
            tasks.values().filter(|t| query.matches(t)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let page_size = query.page_size.max(1);
        let items = matching
            .iter()
            .skip(query.page.saturating_mul(page_size))
            .take(page_size)
            .map(|t| t.snapshot())
            .collect();

        Ok(TaskPage {
            items,
            page: query.page,
            page_size,
            total: matching.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    async fn store() -> MemoryStorage {
        let store = MemoryStorage::new();
        store
            .add_record(LedgerRecord::bank("b1", "acme", day(1), BigDecimal::from(10), "Rent October"))
            .await;
        store
            .add_record(LedgerRecord::bank("b2", "globex", day(1), BigDecimal::from(10), "Rent"))
            .await;
        store
            .add_record(LedgerRecord::book("j1", "acme", day(1), BigDecimal::from(10), "Rent"))
            .await;
        store
            .add_record(LedgerRecord::book("j2", "acme", day(5), BigDecimal::from(10), "Rent"))
            .await;
        store
    }

    fn reconciliation(bank: &[&str], book: &[&str]) -> Reconciliation {
        Reconciliation {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            suggestion_id: Uuid::new_v4(),
            company_id: "acme".into(),
            bank_transaction_ids: bank.iter().map(|s| s.to_string()).collect(),
            journal_entry_ids: book.iter().map(|s| s.to_string()).collect(),
            confidence: 1.0,
            discrepancy: BigDecimal::from(0),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn test_fetch_respects_query() {
        let store = store().await;
        let query = PoolQuery {
            company_id: "acme".into(),
            date_to: Some(day(3)),
            ..Default::default()
        };
        let bank = store.fetch_bank_transactions(&query).await.unwrap();
        let book = store.fetch_journal_entries(&query).await.unwrap();
        assert_eq!(bank.len(), 1);
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].id, "j1");
    }

    #[tokio::test]
    async fn test_claim_is_all_or_nothing() {
        let store = store().await;
        let first = reconciliation(&["b1"], &["j1"]);
        assert_eq!(
            store.apply_reconciliation(&first).await.unwrap(),
            ClaimOutcome::Claimed
        );

        // j2 is free but j1 is taken, so nothing changes
        let second = reconciliation(&[], &["j2", "j1"]);
        let outcome = store.apply_reconciliation(&second).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Conflict {
                record_id: "j1".into(),
                owner: first.task_id
            }
        );
        assert!(!store.record(Side::Book, "j2").await.unwrap().is_reconciled());
        assert_eq!(store.reconciliations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_unknown_record_is_not_found() {
        let store = store().await;
        let err = store
            .apply_reconciliation(&reconciliation(&["missing"], &["j1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_fetch_failures() {
        let store = store().await;
        store.fail_next_fetches(1);
        let query = PoolQuery {
            company_id: "acme".into(),
            ..Default::default()
        };
        assert!(store.fetch_bank_transactions(&query).await.unwrap_err().is_transient());
        assert!(store.fetch_bank_transactions(&query).await.is_ok());
    }

    #[tokio::test]
    async fn test_count_similar_matches() {
        let store = store().await;
        store
            .apply_reconciliation(&reconciliation(&["b1"], &["j1"]))
            .await
            .unwrap();
        assert_eq!(store.count_similar_matches("acme", "rent october").await.unwrap(), 1);
        assert_eq!(store.count_similar_matches("acme", "payroll").await.unwrap(), 0);
        assert_eq!(store.count_similar_matches("globex", "rent october").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_task_transitions_are_compare_and_set() {
        let tasks = MemoryTaskStore::new();
        let task = ReconciliationTask::new(TaskParams {
            company_id: "acme".into(),
            ..Default::default()
        });
        tasks.insert(&task).await.unwrap();

        assert!(tasks
            .transition(task.id, TaskStatus::Queued, TaskStatus::Running)
            .await
            .unwrap());
        // A second worker loses the race
        assert!(!tasks
            .transition(task.id, TaskStatus::Queued, TaskStatus::Running)
            .await
            .unwrap());
        assert!(tasks
            .transition(task.id, TaskStatus::Running, TaskStatus::Completed)
            .await
            .unwrap());

        let stored = tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let tasks = MemoryTaskStore::new();
        for company in ["acme", "acme", "acme", "globex"] {
            let task = ReconciliationTask::new(TaskParams {
                company_id: company.into(),
                ..Default::default()
            });
            tasks.insert(&task).await.unwrap();
        }

        let page = tasks
            .list(&TaskQuery {
                company_id: Some("acme".into()),
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);

        let queued = tasks
            .list(&TaskQuery {
                status: Some(TaskStatus::Running),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(queued.total, 0);
    }
}
