//! Bank-to-book reconciliation engine
//!
//! Data flows config → candidates → scoring → suggestions → auto-match,
//! once per pipeline stage, driven by the task manager.

pub mod auto_match;
pub mod candidates;
pub mod config;
pub mod filters;
pub mod pipeline;
pub mod scoring;
pub mod suggestions;
pub mod tasks;

pub use auto_match::{decide, ApplyOutcome, AutoMatcher, Decision, SkipReason};
pub use candidates::{CandidateGenerator, CandidateGroup};
pub use config::{
    resolve, AdvancedSettings, ConfigOverrides, ConfigScope, EffectiveConfig, GroupSizeLimits,
    PipelineStage, ReconciliationConfig, ReconciliationPipeline, ScoringWeights, Thresholds,
    Tolerances,
};
pub use filters::{FieldValue, FilterPredicate};
pub use pipeline::{RunOutcome, RunPlan, RunStatus};
pub use scoring::{score, ScoredCandidate};
pub use suggestions::{build, BuildOutput};
pub use tasks::{TaskHandle, TaskManager};
