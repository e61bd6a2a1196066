//! Ranking scored candidates into suggestions

use bigdecimal::Zero;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

use crate::reconciliation::config::EffectiveConfig;
use crate::reconciliation::scoring::ScoredCandidate;
use crate::types::*;

/// Suggestions of one stage together with the counters behind them
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Primaries and alternatives in rank order
    pub suggestions: Vec<ReconciliationSuggestion>,
    pub alternatives: usize,
    /// Candidates dropped because their records were already taken
    pub suppressed: usize,
    /// Candidates under `min_confidence`
    pub below_threshold: usize,
}

/// Total ranking order: confidence desc, |discrepancy| asc, date asc, ids asc
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.discrepancy.abs().cmp(&b.discrepancy.abs()))
        .then_with(|| a.date.cmp(&b.date))
        .then_with(|| a.group.sort_key().cmp(&b.group.sort_key()))
}

/// Turn scored candidates into ranked suggestions.
///
/// Acceptance is greedy in rank order. A candidate sharing no record with an
/// accepted suggestion becomes a primary. One that overlaps is kept as an
/// alternative while each of its records is used by fewer than
/// `max_alternatives_per_match` suggestions, and suppressed otherwise.
pub fn build(
    mut scored: Vec<ScoredCandidate>,
    config: &EffectiveConfig,
    task_id: Uuid,
    stage_position: usize,
) -> BuildOutput {
    let thresholds = config.thresholds;
    let mut output = BuildOutput::default();

    let before = scored.len();
    scored.retain(|c| c.confidence >= thresholds.min_confidence);
    output.below_threshold = before - scored.len();
    scored.sort_by(rank_order);

    // Suggestions using each record, and the primary that holds it
    let mut usage: HashMap<String, usize> = HashMap::new();
    let mut holder: HashMap<String, Uuid> = HashMap::new();

    for candidate in scored {
        if output.suggestions.len() >= thresholds.max_suggestions {
            output.suppressed += 1;
            continue;
        }

        let ids: Vec<String> = candidate.group.record_ids().map(str::to_string).collect();
        let overlapping = ids.iter().any(|id| usage.contains_key(id));

        let mut suggestion = to_suggestion(candidate, config, task_id, stage_position);
        if !overlapping {
            for id in &ids {
                holder.insert(id.clone(), suggestion.id);
            }
        } else if ids
            .iter()
            .all(|id| usage.get(id).copied().unwrap_or(0) < thresholds.max_alternatives_per_match)
        {
            suggestion.is_alternative = true;
            suggestion.alternative_of = ids.iter().find_map(|id| holder.get(id).copied());
            output.alternatives += 1;
        } else {
            output.suppressed += 1;
            continue;
        }

        for id in ids {
            *usage.entry(id).or_insert(0) += 1;
        }
        output.suggestions.push(suggestion);
    }

    output
}

fn to_suggestion(
    candidate: ScoredCandidate,
    config: &EffectiveConfig,
    task_id: Uuid,
    stage_position: usize,
) -> ReconciliationSuggestion {
    let group = &candidate.group;
    let uses_existing_book_transaction =
        !group.book.is_empty() && group.book.iter().all(|r| r.book_transaction_id.is_some());

    let proposed_adjustment = if candidate.discrepancy.is_zero() {
        None
    } else {
        config
            .advanced
            .fee_accounts
            .first()
            .map(|account| ProposedAdjustment {
                account: account.clone(),
                amount: candidate.discrepancy.clone(),
            })
    };

    ReconciliationSuggestion {
        id: Uuid::new_v4(),
        task_id,
        stage_position,
        match_type: group.match_type(),
        confidence: candidate.confidence,
        bank_transaction_ids: group.bank_ids(),
        journal_entry_ids: group.book_ids(),
        discrepancy: candidate.discrepancy,
        uses_existing_book_transaction,
        proposed_adjustment,
        similar_accepted_matches: 0,
        is_alternative: false,
        alternative_of: None,
        date: candidate.date,
        breakdown: candidate.breakdown,
    }
}
