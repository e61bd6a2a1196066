//! Pipeline orchestration
//!
//! A task runs a [`RunPlan`]: an ordered snapshot of stages taken when the
//! task was started. Stages share one pair of record pools. Records matched
//! or suggested by a stage are excluded from every later stage of the run.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::reconciliation::auto_match::{decide, ApplyOutcome, AutoMatcher, Decision};
use crate::reconciliation::candidates::CandidateGenerator;
use crate::reconciliation::config::{
    resolve, ConfigOverrides, EffectiveConfig, ReconciliationConfig, ReconciliationPipeline,
};
use crate::reconciliation::scoring::{bank_text, book_text, needs_embedding, score, ScoredCandidate};
use crate::reconciliation::suggestions::build;
use crate::settings::EngineSettings;
use crate::traits::{EmbeddingService, PoolQuery, RecordStore};
use crate::types::*;
use crate::utils::retry::with_backoff;

/// A stage as captured in a run plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStage {
    pub position: usize,
    pub name: String,
    /// Base configuration as it was when the task started
    pub config: ReconciliationConfig,
    /// Pipeline-scope values with the stage's own overrides on top
    pub overrides: ConfigOverrides,
    pub enabled: bool,
}

impl PlannedStage {
    /// Resolve the effective configuration of this stage
    pub fn effective_config(&self) -> ReconResult<EffectiveConfig> {
        resolve(&self.config, &self.overrides)
    }
}

/// Immutable, ordered snapshot of the stages one task runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub stages: Vec<PlannedStage>,
}

impl RunPlan {
    /// Plan running one configuration as a single stage
    pub fn single(config: ReconciliationConfig) -> Self {
        Self {
            stages: vec![PlannedStage {
                position: 0,
                name: config.name.clone(),
                config,
                overrides: ConfigOverrides::default(),
                enabled: true,
            }],
        }
    }

    /// Plan a pipeline; `configs` must hold the config of every stage
    pub fn from_pipeline(
        pipeline: &ReconciliationPipeline,
        configs: &HashMap<String, ReconciliationConfig>,
    ) -> ReconResult<Self> {
        let scope = pipeline.scope_overrides();
        let stages = pipeline
            .ordered_stages()
            .into_iter()
            .map(|stage| {
                let config = configs.get(&stage.config_id).cloned().ok_or_else(|| {
                    ReconError::Validation(format!(
                        "pipeline '{}' stage {} references unknown config '{}'",
                        pipeline.id, stage.position, stage.config_id
                    ))
                })?;
                Ok(PlannedStage {
                    position: stage.position,
                    name: stage.name.clone(),
                    config,
                    overrides: scope.layered(&stage.overrides),
                    enabled: stage.enabled,
                })
            })
            .collect::<ReconResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Stages that will actually run, in order
    pub fn enabled_stages(&self) -> impl Iterator<Item = &PlannedStage> {
        self.stages.iter().filter(|s| s.enabled)
    }
}

/// Collaborators and inputs of one run
#[derive(Clone)]
pub struct RunContext {
    pub task_id: Uuid,
    pub params: TaskParams,
    pub records: Arc<dyn RecordStore>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub settings: EngineSettings,
    pub cancel: CancellationToken,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed(String),
}

/// Everything a run produced, whatever its status
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub result: TaskResult,
    pub suggestions: Vec<ReconciliationSuggestion>,
}

/// State shared by the stages of one run
#[derive(Default)]
struct RunState {
    excluded: HashSet<String>,
    matcher: AutoMatcher,
    embeddings: HashMap<(String, String), Option<f64>>,
    warnings: Vec<String>,
}

enum StageEnd {
    Finished,
    Cancelled,
}

/// Execute a plan to completion, cancellation or failure
#[instrument(skip_all, fields(task_id = %ctx.task_id, company_id = %ctx.params.company_id))]
pub async fn run(ctx: &RunContext, plan: &RunPlan) -> RunOutcome {
    let started = Instant::now();
    let mut result = TaskResult::default();
    let mut suggestions = Vec::new();
    let mut state = RunState::default();

    let status = if ctx.cancel.is_cancelled() {
        RunStatus::Cancelled
    } else {
        match fetch_pools(ctx).await {
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch record pools");
                RunStatus::Failed(e.to_string())
            }
            Ok((bank, book)) => {
                result.bank_candidates = bank.iter().filter(|r| !r.is_reconciled()).count();
                result.journal_candidates = book.iter().filter(|r| !r.is_reconciled()).count();
                tracing::info!(
                    bank_pool = bank.len(),
                    book_pool = book.len(),
                    stages = plan.stages.len(),
                    "Record pools fetched"
                );
                run_stages(ctx, plan, &bank, &book, &mut state, &mut result, &mut suggestions).await
            }
        }
    };

    result.suggestion_count = suggestions.len();
    result.auto_match_applied = state.matcher.applied_count();
    result.matched_bank_transactions = state.matcher.matched_bank_transactions();
    result.matched_journal_entries = state.matcher.matched_journal_entries();
    result.duration_seconds = started.elapsed().as_secs_f64();
    result.warnings = state.warnings;

    tracing::info!(
        suggestions = result.suggestion_count,
        auto_applied = result.auto_match_applied,
        duration_ms = started.elapsed().as_millis() as u64,
        status = ?status,
        "Run finished"
    );

    RunOutcome {
        status,
        result,
        suggestions,
    }
}

async fn run_stages(
    ctx: &RunContext,
    plan: &RunPlan,
    bank: &[Arc<LedgerRecord>],
    book: &[Arc<LedgerRecord>],
    state: &mut RunState,
    result: &mut TaskResult,
    suggestions: &mut Vec<ReconciliationSuggestion>,
) -> RunStatus {
    let bank_index: HashMap<&str, &Arc<LedgerRecord>> =
        bank.iter().map(|r| (r.id.as_str(), r)).collect();

    for stage in plan.enabled_stages() {
        if ctx.cancel.is_cancelled() {
            return RunStatus::Cancelled;
        }

        let config = match stage.effective_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(stage = stage.position, error = %e, "Stage config is invalid");
                return RunStatus::Failed(e.to_string());
            }
        };

        let mut stats = StageStats {
            position: stage.position,
            name: stage.name.clone(),
            config_id: config.config_id.clone(),
            ..Default::default()
        };
        let stage_started = Instant::now();
        let outcome =
            run_stage(ctx, &config, bank, book, &bank_index, state, &mut stats, suggestions).await;
        stats.duration_ms = stage_started.elapsed().as_millis() as u64;

        tracing::info!(
            stage = stage.position,
            name = %stage.name,
            candidates = stats.candidate_groups,
            suggestions = stats.suggestions,
            auto_applied = stats.auto_applied,
            truncated = stats.truncated,
            "Stage finished"
        );

        result.auto_match_skipped += stats.auto_skipped;
        result.stats.push(stats);

        if let StageEnd::Cancelled = outcome {
            return RunStatus::Cancelled;
        }
    }

    RunStatus::Completed
}

#[allow(clippy::too_many_arguments)]
async fn run_stage(
    ctx: &RunContext,
    config: &EffectiveConfig,
    bank: &[Arc<LedgerRecord>],
    book: &[Arc<LedgerRecord>],
    bank_index: &HashMap<&str, &Arc<LedgerRecord>>,
    state: &mut RunState,
    stats: &mut StageStats,
    suggestions: &mut Vec<ReconciliationSuggestion>,
) -> StageEnd {
    // A limit too large to represent is no limit
    let deadline = config
        .soft_time_limit()
        .and_then(|limit| Instant::now().checked_add(limit));
    let use_embedding = needs_embedding(config);

    let generator = CandidateGenerator::new(config, bank, book, &state.excluded);
    stats.bank_candidates = generator.bank_candidates();
    stats.journal_candidates = generator.journal_candidates();
    stats.duplicates_detected = generator.duplicates_detected();

    let mut scored: Vec<ScoredCandidate> = Vec::new();
    let mut batches = generator.batches().peekable();
    'batches: while let Some(batch) = batches.next() {
        if ctx.cancel.is_cancelled() {
            return StageEnd::Cancelled;
        }
        stats.candidate_groups += batch.len();

        let mut groups = batch.into_iter().peekable();
        while let Some(group) = groups.next() {
            let embedding = if use_embedding {
                let left = bank_text(&group);
                let right = book_text(&group);
                let value = embedding_for(ctx, state, stats, left, right).await;
                if ctx.cancel.is_cancelled() {
                    return StageEnd::Cancelled;
                }
                value
            } else {
                None
            };
            scored.push(score(group, config, embedding));

            if deadline.is_some_and(|d| Instant::now() >= d) {
                if groups.peek().is_some() || batches.peek().is_some() {
                    stats.truncated = true;
                    tracing::warn!(
                        config_id = %config.config_id,
                        scored = scored.len(),
                        "Soft time limit reached, truncating stage"
                    );
                }
                break 'batches;
            }
        }

        if ctx.cancel.is_cancelled() {
            return StageEnd::Cancelled;
        }
    }
    stats.scored = scored.len();

    if stats.embedding_failures > 0 {
        state.warnings.push(format!(
            "stage {}: {} embedding lookups failed, embedding sub-score treated as 0",
            stats.position, stats.embedding_failures
        ));
    }

    let mut built = build(scored, config, ctx.task_id, stats.position);
    stats.suggestions = built.suggestions.len();
    stats.alternatives = built.alternatives;
    stats.suppressed = built.suppressed;

    enrich_similar_matches(ctx, &mut built.suggestions, bank_index, &mut state.warnings).await;

    let mut end = StageEnd::Finished;
    for suggestion in &built.suggestions {
        if ctx.cancel.is_cancelled() {
            end = StageEnd::Cancelled;
            break;
        }
        match decide(suggestion, &ctx.params, config) {
            Decision::Apply => {
                let applied = state
                    .matcher
                    .apply(
                        ctx.records.as_ref(),
                        &ctx.settings.retry,
                        suggestion,
                        &ctx.params.company_id,
                    )
                    .await;
                match applied {
                    Ok(ApplyOutcome::Applied) => stats.auto_applied += 1,
                    Ok(ApplyOutcome::AlreadyApplied) => {}
                    Ok(ApplyOutcome::Rejected { .. }) => stats.auto_skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            suggestion_id = %suggestion.id,
                            error = %e,
                            "Auto-apply failed, leaving suggestion for review"
                        );
                        stats.apply_failures += 1;
                        stats.auto_skipped += 1;
                    }
                }
            }
            Decision::Skip(reason) => {
                tracing::trace!(suggestion_id = %suggestion.id, reason = ?reason, "Auto-match skipped");
                stats.auto_skipped += 1;
            }
        }
    }

    if stats.apply_failures > 0 {
        state.warnings.push(format!(
            "stage {}: {} auto-apply attempts failed, suggestions left for review",
            stats.position, stats.apply_failures
        ));
    }

    for suggestion in &built.suggestions {
        state.excluded.extend(suggestion.record_ids().cloned());
    }
    suggestions.extend(built.suggestions);

    end
}

async fn fetch_pools(
    ctx: &RunContext,
) -> ReconResult<(Vec<Arc<LedgerRecord>>, Vec<Arc<LedgerRecord>>)> {
    let params = &ctx.params;
    let bank_query = PoolQuery {
        company_id: params.company_id.clone(),
        date_from: params.date_from,
        date_to: params.date_to,
        ids: params.bank_transaction_ids.clone(),
    };
    let book_query = PoolQuery {
        ids: params.journal_entry_ids.clone(),
        ..bank_query.clone()
    };

    let records = ctx.records.as_ref();
    let bank = with_backoff(&ctx.settings.retry, "fetch_bank_transactions", || {
        records.fetch_bank_transactions(&bank_query)
    })
    .await?;
    let book = with_backoff(&ctx.settings.retry, "fetch_journal_entries", || {
        records.fetch_journal_entries(&book_query)
    })
    .await?;

    Ok((
        bank.into_iter().map(Arc::new).collect(),
        book.into_iter().map(Arc::new).collect(),
    ))
}

/// Embedding similarity of two texts, cached per run
async fn embedding_for(
    ctx: &RunContext,
    state: &mut RunState,
    stats: &mut StageStats,
    left: String,
    right: String,
) -> Option<f64> {
    let key = (left, right);
    if let Some(cached) = state.embeddings.get(&key) {
        return *cached;
    }

    let embedder = ctx.embedder.as_ref();
    let timeout = ctx.settings.embedding_timeout;
    let (left, right) = (&key.0, &key.1);
    let value = with_backoff(&ctx.settings.retry, "embedding_similarity", || {
        similarity_with_timeout(embedder, left, right, timeout)
    })
    .await;

    let value = match value {
        Ok(v) => Some(v),
        Err(e) => {
            stats.embedding_failures += 1;
            tracing::warn!(error = %e, "Embedding lookup failed, scoring without it");
            None
        }
    };
    state.embeddings.insert(key, value);
    value
}

async fn similarity_with_timeout(
    embedder: &dyn EmbeddingService,
    left: &str,
    right: &str,
    timeout: Duration,
) -> ReconResult<f64> {
    match tokio::time::timeout(timeout, embedder.similarity(left, right)).await {
        Ok(result) => result,
        Err(_) => Err(ReconError::external(
            "embedding",
            format!("timed out after {} ms", timeout.as_millis()),
        )),
    }
}

async fn enrich_similar_matches(
    ctx: &RunContext,
    suggestions: &mut [ReconciliationSuggestion],
    bank_index: &HashMap<&str, &Arc<LedgerRecord>>,
    warnings: &mut Vec<String>,
) {
    let records = ctx.records.as_ref();
    let company_id = ctx.params.company_id.as_str();
    let mut failures = 0usize;

    for suggestion in suggestions.iter_mut() {
        let description = suggestion
            .bank_transaction_ids
            .iter()
            .filter_map(|id| bank_index.get(id.as_str()))
            .map(|r| r.description.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if description.trim().is_empty() {
            continue;
        }

        let description = description.as_str();
        match with_backoff(&ctx.settings.retry, "count_similar_matches", || {
            records.count_similar_matches(company_id, description)
        })
        .await
        {
            Ok(count) => suggestion.similar_accepted_matches = count,
            Err(e) => {
                failures += 1;
                tracing::warn!(suggestion_id = %suggestion.id, error = %e, "Similar match lookup failed");
            }
        }
    }

    if failures > 0 {
        warnings.push(format!("{} similar-match lookups failed", failures));
    }
}
