//! # Reconciliation Core
//!
//! Matches bank transactions against ledger journal entries and proposes
//! (or, above a threshold, applies) reconciliations.
//!
//! ## Features
//!
//! - **Configurable scoring**: weighted embedding, amount, currency and date sub-scores
//! - **Group matching**: one-to-one, one-to-many, many-to-one and many-to-many
//! - **Pipelines**: ordered stages, each with its own config and overrides
//! - **Auto-match**: threshold policy or exact-only mode, applied idempotently
//! - **Async tasks**: queued, cancellable runs on a bounded worker pool
//! - **Storage abstraction**: records, configs and tasks behind async traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reconciliation_core::{
//!     EngineSettings, MemoryStorage, MemoryTaskStore, NoopEmbedding, ReconciliationConfig,
//!     TaskManager, TaskParams,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> reconciliation_core::ReconResult<()> {
//! let storage = MemoryStorage::new();
//! storage.add_config(ReconciliationConfig::new("default", "Default")).await;
//!
//! let manager = TaskManager::new(
//!     Arc::new(storage.clone()),
//!     Arc::new(storage),
//!     Arc::new(NoopEmbedding),
//!     Arc::new(MemoryTaskStore::new()),
//!     EngineSettings::from_env(),
//! );
//! let handle = manager
//!     .start(TaskParams {
//!         company_id: "acme".into(),
//!         config_id: Some("default".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! let snapshot = manager.wait_for_completion(handle.task_id, Duration::from_secs(30)).await?;
//! println!("{}", snapshot.status);
//! # Ok(())
//! # }
//! ```

pub mod reconciliation;
pub mod settings;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use reconciliation::*;
pub use settings::*;
pub use traits::*;
pub use types::*;
pub use utils::{init_tracing, MemoryStorage, MemoryTaskStore};
