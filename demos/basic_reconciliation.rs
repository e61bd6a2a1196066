//! Basic reconciliation example

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconciliation_core::{
    init_tracing, EmbeddingService, EngineSettings, LedgerRecord, MemoryStorage, MemoryTaskStore,
    PipelineStage, ReconResult, ReconciliationConfig, ReconciliationPipeline, TaskManager,
    TaskParams,
};
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for a remote embedding model: token overlap of the two texts
struct OverlapEmbedding;

#[async_trait]
impl EmbeddingService for OverlapEmbedding {
    async fn similarity(&self, left: &str, right: &str) -> ReconResult<f64> {
        Ok(reconciliation_core::scoring::text_overlap(left, right))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("reconciliation_core=info");
    println!("🏦 Reconciliation Core - Basic Reconciliation Example\n");

    let storage = MemoryStorage::new();
    let date = |d| NaiveDate::from_ymd_opt(2024, 4, d).ok_or("invalid date");

    // 1. Bank statement lines and ledger entries
    let records = vec![
        LedgerRecord::bank("bank-001", "acme", date(2)?, BigDecimal::from(1200), "Stripe payout 0402")
            .with_currency("USD"),
        LedgerRecord::bank("bank-002", "acme", date(5)?, BigDecimal::from(500), "Wire ACME Supplies")
            .with_currency("USD"),
        LedgerRecord::book("je-101", "acme", date(2)?, BigDecimal::from(1200), "Stripe payout 0402")
            .with_currency("USD")
            .with_book_transaction("tx-9001"),
        LedgerRecord::book("je-102", "acme", date(5)?, BigDecimal::from(300), "ACME Supplies invoice 77")
            .with_currency("USD"),
        LedgerRecord::book("je-103", "acme", date(6)?, BigDecimal::from(200), "ACME Supplies invoice 78")
            .with_currency("USD"),
    ];
    for record in records {
        storage.add_record(record).await;
    }

    // 2. A strict exact pass followed by a looser pass that may split payments
    let mut exact = ReconciliationConfig::new("exact", "Exact amounts");
    exact.tolerances.amount_tolerance = BigDecimal::from(0);
    exact.group_sizes.max_group_size_book = 1;
    exact.thresholds.auto_apply_score = Some(0.95);
    storage.add_config(exact).await;
    storage
        .add_config(ReconciliationConfig::new("grouped", "Grouped"))
        .await;
    storage
        .add_pipeline(ReconciliationPipeline::new(
            "monthly",
            "Monthly close",
            vec![
                PipelineStage::new(0, "exact", "exact"),
                PipelineStage::new(1, "grouped", "grouped"),
            ],
        ))
        .await;

    // 3. Run the pipeline as a task
    let manager = TaskManager::new(
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
        Arc::new(OverlapEmbedding),
        Arc::new(MemoryTaskStore::new()),
        EngineSettings::from_env(),
    );
    let handle = manager
        .start(TaskParams {
            company_id: "acme".into(),
            pipeline_id: Some("monthly".into()),
            ..Default::default()
        })
        .await?;
    println!("📋 Task {} queued", handle.task_id);

    let snapshot = manager
        .wait_for_completion(handle.task_id, Duration::from_secs(30))
        .await?;
    println!("📊 Task finished with status: {}\n", snapshot.status);

    for suggestion in manager.suggestions(handle.task_id).await? {
        println!(
            "  ✓ stage {} {:?}: bank {:?} ↔ book {:?} (confidence {:.3}, discrepancy {})",
            suggestion.stage_position,
            suggestion.match_type,
            suggestion.bank_transaction_ids,
            suggestion.journal_entry_ids,
            suggestion.confidence,
            suggestion.discrepancy
        );
    }

    if let Some(result) = snapshot.result {
        println!(
            "\n🔗 Auto-applied {} match(es) covering {} bank transaction(s)",
            result.auto_match_applied, result.matched_bank_transactions
        );
    }
    println!("🧾 Reconciliations stored: {}", storage.reconciliations().await.len());

    manager.shutdown().await;
    Ok(())
}
