//! Auto-match decisions and idempotent application

use bigdecimal::Zero;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::reconciliation::config::EffectiveConfig;
use crate::settings::RetryPolicy;
use crate::traits::{ClaimOutcome, RecordStore};
use crate::types::*;
use crate::utils::retry::with_backoff;

/// Slack allowed when comparing a confidence against 1.0
pub const EXACT_MATCH_EPSILON: f64 = 1e-9;

/// Why a suggestion was not auto-applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Alternatives are left for manual review
    Alternative,
    /// `auto_match_100` is set and the suggestion is not an exact one-to-one
    NotExact,
    /// No `auto_apply_score` is configured
    NoThreshold,
    BelowThreshold,
    /// A record was claimed earlier in this run or by another task
    RecordClaimed,
}

/// Outcome of the auto-match policy for one suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Skip(SkipReason),
}

/// Decide whether a suggestion should be applied without review.
///
/// With `auto_match_100` only exact one-to-one matches qualify, whatever the
/// configured threshold. Otherwise the suggestion must reach `auto_apply_score`.
pub fn decide(suggestion: &ReconciliationSuggestion, params: &TaskParams, config: &EffectiveConfig) -> Decision {
    if suggestion.is_alternative {
        return Decision::Skip(SkipReason::Alternative);
    }

    if params.auto_match_100 {
        let exact = suggestion.confidence >= 1.0 - EXACT_MATCH_EPSILON
            && suggestion.discrepancy.is_zero()
            && suggestion.match_type == MatchType::OneToOne;
        return if exact {
            Decision::Apply
        } else {
            Decision::Skip(SkipReason::NotExact)
        };
    }

    match config.thresholds.auto_apply_score {
        None => Decision::Skip(SkipReason::NoThreshold),
        Some(threshold) if suggestion.confidence >= threshold => Decision::Apply,
        Some(_) => Decision::Skip(SkipReason::BelowThreshold),
    }
}

/// Result of applying one suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// This suggestion was already applied in this run; nothing changed
    AlreadyApplied,
    /// A record was already claimed; nothing changed
    Rejected { record_id: String },
}

/// Applies suggestions for one run, at most once each
#[derive(Debug, Default)]
pub struct AutoMatcher {
    applied: HashSet<Uuid>,
    claimed: HashSet<String>,
    matched_bank: usize,
    matched_book: usize,
}

impl AutoMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a suggestion as a reconciliation through the store's atomic claim.
    ///
    /// Transient store errors are retried under `retry`. The error of the last
    /// attempt is returned once the policy is exhausted; nothing is recorded
    /// as applied in that case.
    pub async fn apply(
        &mut self,
        store: &dyn RecordStore,
        retry: &RetryPolicy,
        suggestion: &ReconciliationSuggestion,
        company_id: &str,
    ) -> ReconResult<ApplyOutcome> {
        if self.applied.contains(&suggestion.id) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        if let Some(id) = suggestion.record_ids().find(|id| self.claimed.contains(*id)) {
            return Ok(ApplyOutcome::Rejected {
                record_id: id.clone(),
            });
        }

        let reconciliation = Reconciliation::from_suggestion(suggestion, company_id);
        let claim = with_backoff(retry, "apply_reconciliation", || {
            store.apply_reconciliation(&reconciliation)
        })
        .await?;

        // Records owned by this task but not claimed in this run can only come
        // from an earlier attempt whose reply was lost
        let claim = match claim {
            ClaimOutcome::Conflict { owner, .. } if owner == suggestion.task_id => ClaimOutcome::Claimed,
            other => other,
        };

        match claim {
            ClaimOutcome::Claimed => {
                self.applied.insert(suggestion.id);
                self.claimed.extend(suggestion.record_ids().cloned());
                self.matched_bank += suggestion.bank_transaction_ids.len();
                self.matched_book += suggestion.journal_entry_ids.len();
                tracing::debug!(
                    suggestion_id = %suggestion.id,
                    reconciliation_id = %reconciliation.id,
                    "Suggestion auto-applied"
                );
                Ok(ApplyOutcome::Applied)
            }
            ClaimOutcome::Conflict { record_id, owner } => {
                tracing::debug!(
                    suggestion_id = %suggestion.id,
                    record_id = %record_id,
                    owner = %owner,
                    "Claim rejected, record already matched"
                );
                Ok(ApplyOutcome::Rejected { record_id })
            }
        }
    }

    /// Whether the record was claimed by a suggestion applied in this run
    pub fn is_claimed(&self, record_id: &str) -> bool {
        self.claimed.contains(record_id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn matched_bank_transactions(&self) -> usize {
        self.matched_bank
    }

    pub fn matched_journal_entries(&self) -> usize {
        self.matched_book
    }
}
