//! Core types and data structures for the reconciliation system

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Which record stream a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Bank statement lines
    Bank,
    /// Ledger journal entries
    Book,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Bank => write!(f, "bank"),
            Side::Book => write!(f, "book"),
        }
    }
}

/// Reconciliation status of a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MatchStatus {
    /// Still open for matching
    Unmatched,
    /// Claimed by an applied reconciliation of the given task
    Matched { task_id: Uuid },
}

/// A bank transaction or a journal entry as seen by the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Unique identifier of the record within its side
    pub id: String,
    /// Bank or book side
    pub side: Side,
    /// Tenant the record belongs to
    pub company_id: String,
    /// Value date of the record
    pub date: NaiveDate,
    /// Signed amount; both sides use the same sign convention
    pub amount: BigDecimal,
    /// ISO currency code, when known
    pub currency: Option<String>,
    /// Free-text description / memo
    pub description: String,
    /// Bank account or GL account code
    pub account: Option<String>,
    /// Journal transaction the entry belongs to (book side only)
    pub book_transaction_id: Option<String>,
    /// Current reconciliation status
    pub status: MatchStatus,
    /// Additional attributes visible to filter predicates
    pub attributes: HashMap<String, String>,
}

impl LedgerRecord {
    /// Create an unmatched record
    pub fn new(
        id: String,
        side: Side,
        company_id: String,
        date: NaiveDate,
        amount: BigDecimal,
        description: String,
    ) -> Self {
        Self {
            id,
            side,
            company_id,
            date,
            amount,
            currency: None,
            description,
            account: None,
            book_transaction_id: None,
            status: MatchStatus::Unmatched,
            attributes: HashMap::new(),
        }
    }

    /// Create an unmatched bank transaction
    pub fn bank(
        id: impl Into<String>,
        company_id: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            id.into(),
            Side::Bank,
            company_id.into(),
            date,
            amount,
            description.into(),
        )
    }

    /// Create an unmatched journal entry
    pub fn book(
        id: impl Into<String>,
        company_id: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            id.into(),
            Side::Book,
            company_id.into(),
            date,
            amount,
            description.into(),
        )
    }

    /// Set the currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Set the account code
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Link a journal entry to its book transaction
    pub fn with_book_transaction(mut self, book_transaction_id: impl Into<String>) -> Self {
        self.book_transaction_id = Some(book_transaction_id.into());
        self
    }

    /// Add a filterable attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether the record has already been reconciled
    pub fn is_reconciled(&self) -> bool {
        matches!(self.status, MatchStatus::Matched { .. })
    }
}

/// Shape of a correspondence between the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    OneToOne,
    /// One bank transaction, several journal entries
    OneToMany,
    /// Several bank transactions, one journal entry
    ManyToOne,
    ManyToMany,
}

impl MatchType {
    /// Classify a group by the number of records on each side
    pub fn from_counts(bank: usize, book: usize) -> Self {
        match (bank > 1, book > 1) {
            (false, false) => MatchType::OneToOne,
            (false, true) => MatchType::OneToMany,
            (true, false) => MatchType::ManyToOne,
            (true, true) => MatchType::ManyToMany,
        }
    }
}

/// Individual sub-scores behind a confidence value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub embedding: f64,
    pub amount: f64,
    pub currency: f64,
    pub date: f64,
}

/// A new book transaction proposed to absorb a discrepancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAdjustment {
    /// Fee / adjustment account the discrepancy is posted to
    pub account: String,
    /// Amount to post (the suggestion's discrepancy)
    pub amount: BigDecimal,
}

/// A proposed correspondence between bank transactions and journal entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSuggestion {
    pub id: Uuid,
    /// Task whose run produced the suggestion
    pub task_id: Uuid,
    /// Position of the pipeline stage that produced it
    pub stage_position: usize,
    pub match_type: MatchType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub bank_transaction_ids: Vec<String>,
    pub journal_entry_ids: Vec<String>,
    /// Signed book total minus bank total
    pub discrepancy: BigDecimal,
    /// Every journal entry belongs to an existing book transaction
    pub uses_existing_book_transaction: bool,
    /// New book transaction proposed to settle the discrepancy
    pub proposed_adjustment: Option<ProposedAdjustment>,
    /// Number of previously accepted matches with a similar description
    pub similar_accepted_matches: u32,
    /// Kept as a secondary option next to a better suggestion
    pub is_alternative: bool,
    /// The primary suggestion this one is an alternative to
    pub alternative_of: Option<Uuid>,
    /// Earliest record date in the group
    pub date: NaiveDate,
    pub breakdown: ScoreBreakdown,
}

impl ReconciliationSuggestion {
    /// All record ids (bank first, then book) covered by this suggestion
    pub fn record_ids(&self) -> impl Iterator<Item = &String> {
        self.bank_transaction_ids
            .iter()
            .chain(self.journal_entry_ids.iter())
    }
}

/// An applied match, persisted by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub suggestion_id: Uuid,
    pub company_id: String,
    pub bank_transaction_ids: Vec<String>,
    pub journal_entry_ids: Vec<String>,
    pub confidence: f64,
    pub discrepancy: BigDecimal,
    pub created_at: NaiveDateTime,
}

impl Reconciliation {
    /// Build the reconciliation record for a suggestion applied by a task
    pub fn from_suggestion(suggestion: &ReconciliationSuggestion, company_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: suggestion.task_id,
            suggestion_id: suggestion.id,
            company_id: company_id.to_string(),
            bank_transaction_ids: suggestion.bank_transaction_ids.clone(),
            journal_entry_ids: suggestion.journal_entry_ids.clone(),
            confidence: suggestion.confidence,
            discrepancy: suggestion.discrepancy.clone(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Lifecycle state of a reconciliation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Parameters of a reconciliation start request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Tenant whose records are reconciled
    pub company_id: String,
    /// Single configuration to run (exclusive with `pipeline_id`)
    pub config_id: Option<String>,
    /// Pipeline to run (exclusive with `config_id`)
    pub pipeline_id: Option<String>,
    /// Restrict the bank pool to these ids
    pub bank_transaction_ids: Option<Vec<String>>,
    /// Restrict the book pool to these ids
    pub journal_entry_ids: Option<Vec<String>>,
    /// Earliest record date considered
    pub date_from: Option<NaiveDate>,
    /// Latest record date considered
    pub date_to: Option<NaiveDate>,
    /// Only auto-apply exact one-to-one matches
    pub auto_match_100: bool,
}

/// Per-stage statistics of a task run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub position: usize,
    pub name: String,
    pub config_id: String,
    pub bank_candidates: usize,
    pub journal_candidates: usize,
    pub candidate_groups: usize,
    pub scored: usize,
    pub suggestions: usize,
    pub alternatives: usize,
    pub suppressed: usize,
    pub auto_applied: usize,
    pub auto_skipped: usize,
    pub duplicates_detected: usize,
    pub embedding_failures: usize,
    /// Auto-applies that failed after retries and were left for review
    #[serde(default)]
    pub apply_failures: usize,
    /// Stage was cut short by its soft time limit
    pub truncated: bool,
    pub duration_ms: u64,
}

/// Aggregated result of a task run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub bank_candidates: usize,
    pub journal_candidates: usize,
    pub suggestion_count: usize,
    pub matched_bank_transactions: usize,
    pub matched_journal_entries: usize,
    pub auto_match_applied: usize,
    pub auto_match_skipped: usize,
    pub duration_seconds: f64,
    pub stats: Vec<StageStats>,
    pub warnings: Vec<String>,
}

/// Unit of asynchronous reconciliation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationTask {
    pub id: Uuid,
    pub status: TaskStatus,
    pub params: TaskParams,
    pub result: Option<TaskResult>,
    /// Suggestions produced by the run, owned by the task
    pub suggestions: Vec<ReconciliationSuggestion>,
    /// Populated only when the task failed
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

impl ReconciliationTask {
    /// Create a new queued task
    pub fn new(params: TaskParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Queued,
            params,
            result: None,
            suggestions: Vec::new(),
            error_message: None,
            created_at: chrono::Utc::now().naive_utc(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Read-only view returned by status queries
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            status: self.status,
            company_id: self.params.company_id.clone(),
            config_id: self.params.config_id.clone(),
            pipeline_id: self.params.pipeline_id.clone(),
            auto_match_100: self.params.auto_match_100,
            result: self.result.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Status snapshot of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub company_id: String,
    pub config_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub auto_match_100: bool,
    pub result: Option<TaskResult>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

/// Acknowledgement of a cancel request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    pub task_id: Uuid,
    /// Status observed after the request was handled
    pub status: TaskStatus,
    /// False when the task was already terminal
    pub accepted: bool,
}

/// Filters and pagination for task listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQuery {
    pub company_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub created_after: Option<NaiveDateTime>,
    pub created_before: Option<NaiveDateTime>,
    /// Zero-based page index
    pub page: usize,
    pub page_size: usize,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            company_id: None,
            status: None,
            created_after: None,
            created_before: None,
            page: 0,
            page_size: 50,
        }
    }
}

impl TaskQuery {
    /// Whether a task passes the query's filters
    pub fn matches(&self, task: &ReconciliationTask) -> bool {
        self.company_id
            .as_ref()
            .is_none_or(|c| &task.params.company_id == c)
            && self.status.is_none_or(|s| task.status == s)
            && self.created_after.is_none_or(|t| task.created_at >= t)
            && self.created_before.is_none_or(|t| task.created_at <= t)
    }
}

/// One page of a task listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub items: Vec<TaskSnapshot>,
    pub page: usize,
    pub page_size: usize,
    /// Number of tasks matching the filters across all pages
    pub total: usize,
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("External service '{service}' failed: {message}")]
    ExternalService { service: String, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Task queue is full")]
    QueueFull,
}

impl ReconError {
    /// Shorthand for an external collaborator failure
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        ReconError::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconError::ExternalService { .. })
    }
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_from_counts() {
        assert_eq!(MatchType::from_counts(1, 1), MatchType::OneToOne);
        assert_eq!(MatchType::from_counts(1, 3), MatchType::OneToMany);
        assert_eq!(MatchType::from_counts(2, 1), MatchType::ManyToOne);
        assert_eq!(MatchType::from_counts(2, 2), MatchType::ManyToMany);
    }

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_match_status_serialization() {
        let task_id = Uuid::new_v4();
        let json = serde_json::to_value(MatchStatus::Matched { task_id }).unwrap();
        assert_eq!(json["state"], "matched");
        assert_eq!(
            serde_json::to_value(MatchType::OneToMany).unwrap(),
            "one_to_many"
        );
    }
}
