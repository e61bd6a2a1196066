//! Confidence scoring of candidate groups
//!
//! Confidence is the weighted sum of four sub-scores, each in [0, 1]. Missing
//! inputs contribute zero; scoring never fails.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::NaiveDate;
use std::collections::HashSet;

use crate::reconciliation::candidates::CandidateGroup;
use crate::reconciliation::config::EffectiveConfig;
use crate::types::ScoreBreakdown;

/// A candidate group with its confidence
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub group: CandidateGroup,
    pub confidence: f64,
    pub breakdown: ScoreBreakdown,
    /// Signed book total minus bank total
    pub discrepancy: BigDecimal,
    /// Earliest member date
    pub date: NaiveDate,
}

/// Score a candidate group.
///
/// `embedding` is the external similarity of the group's bank and book
/// texts, or `None` when it was not requested or could not be obtained.
pub fn score(group: CandidateGroup, config: &EffectiveConfig, embedding: Option<f64>) -> ScoredCandidate {
    let discrepancy = group.discrepancy();

    let breakdown = ScoreBreakdown {
        embedding: text_score(&group, config, embedding),
        amount: amount_score(&discrepancy.abs(), &config.tolerances.amount_tolerance),
        currency: currency_score(&group),
        date: date_score(&group, config.tolerances.avg_date_delta_days),
    };

    let w = &config.weights;
    let raw = w.embedding * breakdown.embedding
        + w.amount * breakdown.amount
        + w.currency * breakdown.currency
        + w.date * breakdown.date;
    let confidence = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

    let date = group.earliest_date();
    ScoredCandidate {
        group,
        confidence,
        breakdown,
        discrepancy,
        date,
    }
}

/// Whether scoring under this config uses the external embedding at all
pub fn needs_embedding(config: &EffectiveConfig) -> bool {
    config.weights.embedding > 0.0 && config.advanced.text_similarity.is_none_or(|t| t < 1.0)
}

/// Concatenated descriptions of the bank side
pub fn bank_text(group: &CandidateGroup) -> String {
    join_descriptions(group.bank.iter().map(|r| r.description.as_str()))
}

/// Concatenated descriptions of the book side
pub fn book_text(group: &CandidateGroup) -> String {
    join_descriptions(group.book.iter().map(|r| r.description.as_str()))
}

fn join_descriptions<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased alphanumeric tokens of a text
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard overlap of the token sets of two texts
pub fn text_overlap(left: &str, right: &str) -> f64 {
    let left: HashSet<String> = tokens(left).into_iter().collect();
    let right: HashSet<String> = tokens(right).into_iter().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

fn text_score(group: &CandidateGroup, config: &EffectiveConfig, embedding: Option<f64>) -> f64 {
    let embedding = embedding
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.0);
    match config.advanced.text_similarity {
        Some(blend) => {
            let lexical = text_overlap(&bank_text(group), &book_text(group));
            (1.0 - blend) * embedding + blend * lexical
        }
        None => embedding,
    }
}

/// `1 - |delta| / tolerance`, floored at zero; zero tolerance demands equality
pub fn amount_score(delta: &BigDecimal, tolerance: &BigDecimal) -> f64 {
    if tolerance.is_zero() {
        return if delta.is_zero() { 1.0 } else { 0.0 };
    }
    let ratio = (delta.abs() / tolerance).to_f64().unwrap_or(f64::INFINITY);
    (1.0 - ratio).max(0.0)
}

/// 1 when every member carries the same currency
pub fn currency_score(group: &CandidateGroup) -> f64 {
    let mut currencies = group.bank.iter().chain(group.book.iter()).map(|r| r.currency.as_deref());
    let Some(Some(first)) = currencies.next() else {
        return 0.0;
    };
    if currencies.all(|c| c == Some(first)) {
        1.0
    } else {
        0.0
    }
}

/// `1 - avg|Δdays| / avg_delta` over all bank × book pairs, floored at zero
pub fn date_score(group: &CandidateGroup, avg_delta: f64) -> f64 {
    let pairs = group.bank.len() * group.book.len();
    if pairs == 0 {
        return 0.0;
    }
    let total: i64 = group
        .bank
        .iter()
        .flat_map(|b| group.book.iter().map(move |j| (b.date - j.date).num_days().abs()))
        .sum();
    let average = total as f64 / pairs as f64;

    if avg_delta <= 0.0 {
        return if average == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - average / avg_delta).max(0.0)
}
