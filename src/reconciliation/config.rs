//! Reconciliation configurations, pipelines and the config resolver

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::reconciliation::filters::FilterPredicate;
use crate::types::*;

/// Allowed deviation of the weight sum from 1.0
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Longest accepted per-stage time budget, in seconds
pub const MAX_SOFT_TIME_LIMIT_SECS: f64 = 86_400.0;

/// Default number of same-side records considered for multi-record groups
/// around one anchor
pub const DEFAULT_MULTI_WINDOW: usize = 12;

/// Upper bound for `multi_window`; enumeration grows combinatorially with it
pub const MAX_MULTI_WINDOW: usize = 24;

/// Visibility scope of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    Company { company_id: String },
    User { user_id: String },
    CompanyUser { company_id: String, user_id: String },
}

impl ConfigScope {
    /// Whether tasks of the given company may use a config with this scope
    pub fn permits_company(&self, company_id: &str) -> bool {
        match self {
            ConfigScope::Global | ConfigScope::User { .. } => true,
            ConfigScope::Company { company_id: c } | ConfigScope::CompanyUser { company_id: c, .. } => {
                c == company_id
            }
        }
    }
}

/// Weights of the four sub-scores; they must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub embedding: f64,
    pub amount: f64,
    pub currency: f64,
    pub date: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.embedding + self.amount + self.currency + self.date
    }
}

/// Matching tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Amount difference at which the amount sub-score reaches zero
    pub amount_tolerance: BigDecimal,
    /// Maximum date span of the records in one group
    pub group_span_days: i64,
    /// Average date difference at which the date sub-score reaches zero
    pub avg_date_delta_days: f64,
}

/// Caps on the number of records per side in one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSizeLimits {
    pub max_group_size_bank: usize,
    pub max_group_size_book: usize,
}

/// Suggestion thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_confidence: f64,
    pub max_suggestions: usize,
    /// Maximum number of suggestions that may share one record
    pub max_alternatives_per_match: usize,
    /// Suggestions at or above this confidence are auto-applied
    #[serde(default)]
    pub auto_apply_score: Option<f64>,
}

/// Less common knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedSettings {
    /// Per-stage time budget in seconds
    #[serde(default)]
    pub soft_time_limit: Option<f64>,
    /// Accounts a discrepancy may be posted to
    #[serde(default)]
    pub fee_accounts: Vec<String>,
    /// Window in days for same-side duplicate detection; 0 disables it
    #[serde(default)]
    pub duplicate_window: i64,
    /// Blend factor of lexical text overlap into the embedding sub-score
    #[serde(default)]
    pub text_similarity: Option<f64>,
    /// Nearest same-side and counterpart records per anchor that multi-record
    /// groups are built from. One-to-one pairs are not limited by it.
    #[serde(default = "default_multi_window")]
    pub multi_window: usize,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            soft_time_limit: None,
            fee_accounts: Vec::new(),
            duplicate_window: 0,
            text_similarity: None,
            multi_window: DEFAULT_MULTI_WINDOW,
        }
    }
}

fn default_multi_window() -> usize {
    DEFAULT_MULTI_WINDOW
}

/// A named scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub id: String,
    pub name: String,
    pub scope: ConfigScope,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub weights: ScoringWeights,
    pub tolerances: Tolerances,
    pub group_sizes: GroupSizeLimits,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub bank_filters: Vec<FilterPredicate>,
    #[serde(default)]
    pub book_filters: Vec<FilterPredicate>,
    #[serde(default)]
    pub advanced: AdvancedSettings,
}

fn default_enabled() -> bool {
    true
}

impl ReconciliationConfig {
    /// Create a global configuration with default weights and thresholds
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope: ConfigScope::Global,
            enabled: true,
            weights: ScoringWeights {
                embedding: 0.2,
                amount: 0.4,
                currency: 0.2,
                date: 0.2,
            },
            tolerances: Tolerances {
                amount_tolerance: BigDecimal::from(1),
                group_span_days: 3,
                avg_date_delta_days: 5.0,
            },
            group_sizes: GroupSizeLimits {
                max_group_size_bank: 1,
                max_group_size_book: 3,
            },
            thresholds: Thresholds {
                min_confidence: 0.5,
                max_suggestions: 100,
                max_alternatives_per_match: 1,
                auto_apply_score: None,
            },
            bank_filters: Vec::new(),
            book_filters: Vec::new(),
            advanced: AdvancedSettings::default(),
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> ReconResult<Self> {
        serde_json::from_str(json).map_err(|e| ReconError::InvalidConfig(e.to_string()))
    }
}

/// Sparse set of config overrides; every present field replaces the base value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub embedding_weight: Option<f64>,
    pub amount_weight: Option<f64>,
    pub currency_weight: Option<f64>,
    pub date_weight: Option<f64>,
    pub amount_tolerance: Option<BigDecimal>,
    pub group_span_days: Option<i64>,
    pub avg_date_delta_days: Option<f64>,
    pub max_group_size_bank: Option<usize>,
    pub max_group_size_book: Option<usize>,
    pub min_confidence: Option<f64>,
    pub max_suggestions: Option<usize>,
    pub max_alternatives_per_match: Option<usize>,
    pub auto_apply_score: Option<f64>,
    pub bank_filters: Option<Vec<FilterPredicate>>,
    pub book_filters: Option<Vec<FilterPredicate>>,
    pub soft_time_limit: Option<f64>,
    pub fee_accounts: Option<Vec<String>>,
    pub duplicate_window: Option<i64>,
    pub text_similarity: Option<f64>,
    pub multi_window: Option<usize>,
}

impl ConfigOverrides {
    /// Parse overrides from a JSON object; unknown keys are rejected
    pub fn from_json_value(value: serde_json::Value) -> ReconResult<Self> {
        serde_json::from_value(value).map_err(|e| ReconError::InvalidConfig(e.to_string()))
    }

    /// Stack `top` over `self`; fields set in `top` win
    pub fn layered(&self, top: &ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            embedding_weight: top.embedding_weight.or(self.embedding_weight),
            amount_weight: top.amount_weight.or(self.amount_weight),
            currency_weight: top.currency_weight.or(self.currency_weight),
            date_weight: top.date_weight.or(self.date_weight),
            amount_tolerance: top
                .amount_tolerance
                .clone()
                .or_else(|| self.amount_tolerance.clone()),
            group_span_days: top.group_span_days.or(self.group_span_days),
            avg_date_delta_days: top.avg_date_delta_days.or(self.avg_date_delta_days),
            max_group_size_bank: top.max_group_size_bank.or(self.max_group_size_bank),
            max_group_size_book: top.max_group_size_book.or(self.max_group_size_book),
            min_confidence: top.min_confidence.or(self.min_confidence),
            max_suggestions: top.max_suggestions.or(self.max_suggestions),
            max_alternatives_per_match: top
                .max_alternatives_per_match
                .or(self.max_alternatives_per_match),
            auto_apply_score: top.auto_apply_score.or(self.auto_apply_score),
            bank_filters: top
                .bank_filters
                .clone()
                .or_else(|| self.bank_filters.clone()),
            book_filters: top
                .book_filters
                .clone()
                .or_else(|| self.book_filters.clone()),
            soft_time_limit: top.soft_time_limit.or(self.soft_time_limit),
            fee_accounts: top
                .fee_accounts
                .clone()
                .or_else(|| self.fee_accounts.clone()),
            duplicate_window: top.duplicate_window.or(self.duplicate_window),
            text_similarity: top.text_similarity.or(self.text_similarity),
            multi_window: top.multi_window.or(self.multi_window),
        }
    }
}

/// A configuration with overrides applied and invariants checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config_id: String,
    pub name: String,
    pub weights: ScoringWeights,
    pub tolerances: Tolerances,
    pub group_sizes: GroupSizeLimits,
    pub thresholds: Thresholds,
    pub bank_filters: Vec<FilterPredicate>,
    pub book_filters: Vec<FilterPredicate>,
    pub advanced: AdvancedSettings,
}

impl EffectiveConfig {
    /// Per-stage time budget, if any
    pub fn soft_time_limit(&self) -> Option<Duration> {
        self.advanced
            .soft_time_limit
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Merge `overrides` into `base` and validate the result
pub fn resolve(
    base: &ReconciliationConfig,
    overrides: &ConfigOverrides,
) -> ReconResult<EffectiveConfig> {
    let mut weights = base.weights;
    let mut tolerances = base.tolerances.clone();
    let mut group_sizes = base.group_sizes;
    let mut thresholds = base.thresholds;
    let mut advanced = base.advanced.clone();

    if let Some(w) = overrides.embedding_weight {
        weights.embedding = w;
    }
    if let Some(w) = overrides.amount_weight {
        weights.amount = w;
    }
    if let Some(w) = overrides.currency_weight {
        weights.currency = w;
    }
    if let Some(w) = overrides.date_weight {
        weights.date = w;
    }
    if let Some(ref tol) = overrides.amount_tolerance {
        tolerances.amount_tolerance = tol.clone();
    }
    if let Some(days) = overrides.group_span_days {
        tolerances.group_span_days = days;
    }
    if let Some(days) = overrides.avg_date_delta_days {
        tolerances.avg_date_delta_days = days;
    }
    if let Some(size) = overrides.max_group_size_bank {
        group_sizes.max_group_size_bank = size;
    }
    if let Some(size) = overrides.max_group_size_book {
        group_sizes.max_group_size_book = size;
    }
    if let Some(min) = overrides.min_confidence {
        thresholds.min_confidence = min;
    }
    if let Some(max) = overrides.max_suggestions {
        thresholds.max_suggestions = max;
    }
    if let Some(max) = overrides.max_alternatives_per_match {
        thresholds.max_alternatives_per_match = max;
    }
    if let Some(score) = overrides.auto_apply_score {
        thresholds.auto_apply_score = Some(score);
    }
    if let Some(limit) = overrides.soft_time_limit {
        advanced.soft_time_limit = Some(limit);
    }
    if let Some(ref accounts) = overrides.fee_accounts {
        advanced.fee_accounts = accounts.clone();
    }
    if let Some(window) = overrides.duplicate_window {
        advanced.duplicate_window = window;
    }
    if let Some(blend) = overrides.text_similarity {
        advanced.text_similarity = Some(blend);
    }
    if let Some(window) = overrides.multi_window {
        advanced.multi_window = window;
    }

    let effective = EffectiveConfig {
        config_id: base.id.clone(),
        name: base.name.clone(),
        weights,
        tolerances,
        group_sizes,
        thresholds,
        bank_filters: overrides
            .bank_filters
            .clone()
            .unwrap_or_else(|| base.bank_filters.clone()),
        book_filters: overrides
            .book_filters
            .clone()
            .unwrap_or_else(|| base.book_filters.clone()),
        advanced,
    };

    validate_effective(&effective)?;
    Ok(effective)
}

fn invalid(config: &EffectiveConfig, message: String) -> ReconError {
    ReconError::InvalidConfig(format!("config '{}': {}", config.config_id, message))
}

fn check_unit_interval(config: &EffectiveConfig, name: &str, value: f64) -> ReconResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(
            config,
            format!("{} must be within [0, 1], got {}", name, value),
        ));
    }
    Ok(())
}

fn check_non_negative(config: &EffectiveConfig, name: &str, value: f64) -> ReconResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(
            config,
            format!("{} must be non-negative, got {}", name, value),
        ));
    }
    Ok(())
}

fn validate_effective(config: &EffectiveConfig) -> ReconResult<()> {
    let w = &config.weights;
    for (name, value) in [
        ("embedding weight", w.embedding),
        ("amount weight", w.amount),
        ("currency weight", w.currency),
        ("date weight", w.date),
    ] {
        check_non_negative(config, name, value)?;
    }
    if (w.sum() - 1.0).abs() > WEIGHT_EPSILON {
        return Err(invalid(
            config,
            format!("weights must sum to 1.0, got {}", w.sum()),
        ));
    }

    if config.tolerances.amount_tolerance < BigDecimal::from(0) {
        return Err(invalid(
            config,
            format!(
                "amount_tolerance must be non-negative, got {}",
                config.tolerances.amount_tolerance
            ),
        ));
    }
    check_non_negative(
        config,
        "group_span_days",
        config.tolerances.group_span_days as f64,
    )?;
    check_non_negative(
        config,
        "avg_date_delta_days",
        config.tolerances.avg_date_delta_days,
    )?;

    if config.group_sizes.max_group_size_bank < 1 {
        return Err(invalid(config, "max_group_size_bank must be at least 1".into()));
    }
    if config.group_sizes.max_group_size_book < 1 {
        return Err(invalid(config, "max_group_size_book must be at least 1".into()));
    }
    if config.thresholds.max_alternatives_per_match < 1 {
        return Err(invalid(
            config,
            "max_alternatives_per_match must be at least 1".into(),
        ));
    }

    check_unit_interval(config, "min_confidence", config.thresholds.min_confidence)?;
    if let Some(score) = config.thresholds.auto_apply_score {
        check_unit_interval(config, "auto_apply_score", score)?;
    }
    if let Some(blend) = config.advanced.text_similarity {
        check_unit_interval(config, "text_similarity", blend)?;
    }
    if let Some(limit) = config.advanced.soft_time_limit {
        check_non_negative(config, "soft_time_limit", limit)?;
        if limit > MAX_SOFT_TIME_LIMIT_SECS {
            return Err(invalid(
                config,
                format!(
                    "soft_time_limit must not exceed {} seconds, got {}",
                    MAX_SOFT_TIME_LIMIT_SECS, limit
                ),
            ));
        }
    }
    if !(1..=MAX_MULTI_WINDOW).contains(&config.advanced.multi_window) {
        return Err(invalid(
            config,
            format!(
                "multi_window must be within [1, {}], got {}",
                MAX_MULTI_WINDOW, config.advanced.multi_window
            ),
        ));
    }
    check_non_negative(
        config,
        "duplicate_window",
        config.advanced.duplicate_window as f64,
    )?;

    Ok(())
}

/// One config-bound matching pass within a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    /// Dense, unique ordering key
    pub position: usize,
    pub name: String,
    pub config_id: String,
    #[serde(default)]
    pub overrides: ConfigOverrides,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PipelineStage {
    /// Create an enabled stage without overrides
    pub fn new(position: usize, name: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
            config_id: config_id.into(),
            overrides: ConfigOverrides::default(),
            enabled: true,
        }
    }

    /// Set the stage overrides
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Ordered sequence of matching stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPipeline {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub stages: Vec<PipelineStage>,
    /// Pipeline-wide values, used when a stage does not override them
    #[serde(default)]
    pub auto_apply_score: Option<f64>,
    #[serde(default)]
    pub max_suggestions: Option<usize>,
    #[serde(default)]
    pub soft_time_limit: Option<f64>,
}

impl ReconciliationPipeline {
    /// Create an enabled pipeline
    pub fn new(id: impl Into<String>, name: impl Into<String>, stages: Vec<PipelineStage>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            stages,
            auto_apply_score: None,
            max_suggestions: None,
            soft_time_limit: None,
        }
    }

    /// Parse a pipeline from JSON
    pub fn from_json(json: &str) -> ReconResult<Self> {
        serde_json::from_str(json).map_err(|e| ReconError::InvalidConfig(e.to_string()))
    }

    /// Stages sorted by position, disabled ones included
    pub fn ordered_stages(&self) -> Vec<&PipelineStage> {
        let mut stages: Vec<&PipelineStage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.position);
        stages
    }

    /// Check that stage positions form the dense sequence 0..n
    pub fn validate_order(&self) -> ReconResult<()> {
        for (expected, stage) in self.ordered_stages().into_iter().enumerate() {
            if stage.position != expected {
                return Err(ReconError::Validation(format!(
                    "pipeline '{}': stage positions must be dense and unique, expected {} but found {}",
                    self.id, expected, stage.position
                )));
            }
        }
        Ok(())
    }

    /// Pipeline-wide values expressed as overrides
    pub fn scope_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            auto_apply_score: self.auto_apply_score,
            max_suggestions: self.max_suggestions,
            soft_time_limit: self.soft_time_limit,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_without_overrides_keeps_base() {
        let base = ReconciliationConfig::new("cfg", "Default");
        let effective = resolve(&base, &ConfigOverrides::default()).unwrap();
        assert_eq!(effective.weights, base.weights);
        assert_eq!(effective.thresholds, base.thresholds);
        assert!((effective.weights.sum() - 1.0).abs() <= WEIGHT_EPSILON);
    }

    #[test]
    fn test_resolve_applies_sparse_overrides() {
        let base = ReconciliationConfig::new("cfg", "Default");
        let overrides = ConfigOverrides::from_json_value(json!({
            "min_confidence": 0.8,
            "max_group_size_bank": 2,
            "amount_tolerance": "0.50"
        }))
        .unwrap();

        let effective = resolve(&base, &overrides).unwrap();
        assert_eq!(effective.thresholds.min_confidence, 0.8);
        assert_eq!(effective.group_sizes.max_group_size_bank, 2);
        assert_eq!(
            effective.tolerances.amount_tolerance,
            "0.50".parse::<BigDecimal>().unwrap()
        );
        // Untouched values are inherited
        assert_eq!(
            effective.group_sizes.max_group_size_book,
            base.group_sizes.max_group_size_book
        );
    }

    #[test]
    fn test_resolve_rejects_bad_weight_sum() {
        let base = ReconciliationConfig::new("cfg", "Default");
        let overrides = ConfigOverrides {
            amount_weight: Some(0.9),
            ..Default::default()
        };
        let err = resolve(&base, &overrides).unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
    }

    #[test]
    fn test_resolve_rejects_negative_values() {
        let base = ReconciliationConfig::new("cfg", "Default");

        let negative_tolerance = ConfigOverrides {
            amount_tolerance: Some(BigDecimal::from(-1)),
            ..Default::default()
        };
        assert!(resolve(&base, &negative_tolerance).is_err());

        let negative_span = ConfigOverrides {
            group_span_days: Some(-2),
            ..Default::default()
        };
        assert!(resolve(&base, &negative_span).is_err());

        let zero_group = ConfigOverrides {
            max_group_size_book: Some(0),
            ..Default::default()
        };
        assert!(resolve(&base, &zero_group).is_err());
    }

    #[test]
    fn test_resolve_bounds_soft_time_limit() {
        let base = ReconciliationConfig::new("cfg", "Default");

        let huge = ConfigOverrides {
            soft_time_limit: Some(1e20),
            ..Default::default()
        };
        let err = resolve(&base, &huge).unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(ref m) if m.contains("soft_time_limit")));

        let day = ConfigOverrides {
            soft_time_limit: Some(MAX_SOFT_TIME_LIMIT_SECS),
            ..Default::default()
        };
        let effective = resolve(&base, &day).unwrap();
        assert_eq!(effective.soft_time_limit(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_multi_window_is_configurable_and_bounded() {
        let base = ReconciliationConfig::new("cfg", "Default");
        let effective = resolve(&base, &ConfigOverrides::default()).unwrap();
        assert_eq!(effective.advanced.multi_window, DEFAULT_MULTI_WINDOW);

        let narrow = ConfigOverrides::from_json_value(json!({ "multi_window": 4 })).unwrap();
        assert_eq!(resolve(&base, &narrow).unwrap().advanced.multi_window, 4);

        for window in [0, MAX_MULTI_WINDOW + 1] {
            let overrides = ConfigOverrides {
                multi_window: Some(window),
                ..Default::default()
            };
            assert!(matches!(
                resolve(&base, &overrides),
                Err(ReconError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_overrides_reject_unknown_keys() {
        let err = ConfigOverrides::from_json_value(json!({ "min_confidance": 0.4 })).unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
    }

    #[test]
    fn test_layered_overrides_prefer_top() {
        let pipeline = ConfigOverrides {
            auto_apply_score: Some(0.9),
            max_suggestions: Some(10),
            ..Default::default()
        };
        let stage = ConfigOverrides {
            auto_apply_score: Some(0.95),
            ..Default::default()
        };
        let merged = pipeline.layered(&stage);
        assert_eq!(merged.auto_apply_score, Some(0.95));
        assert_eq!(merged.max_suggestions, Some(10));
    }

    #[test]
    fn test_pipeline_order_validation() {
        let pipeline = ReconciliationPipeline::new(
            "p",
            "Pipeline",
            vec![
                PipelineStage::new(1, "second", "cfg"),
                PipelineStage::new(0, "first", "cfg"),
            ],
        );
        assert!(pipeline.validate_order().is_ok());
        assert_eq!(pipeline.ordered_stages()[0].name, "first");

        let gapped = ReconciliationPipeline::new(
            "p",
            "Pipeline",
            vec![
                PipelineStage::new(0, "first", "cfg"),
                PipelineStage::new(2, "third", "cfg"),
            ],
        );
        assert!(matches!(
            gapped.validate_order(),
            Err(ReconError::Validation(_))
        ));
    }

    #[test]
    fn test_config_scope_permits_company() {
        assert!(ConfigScope::Global.permits_company("acme"));
        let scoped = ConfigScope::Company {
            company_id: "acme".into(),
        };
        assert!(scoped.permits_company("acme"));
        assert!(!scoped.permits_company("globex"));
    }

    #[test]
    fn test_config_from_json() {
        let config = ReconciliationConfig::from_json(
            r#"{
                "id": "strict",
                "name": "Strict",
                "scope": { "scope": "company", "company_id": "acme" },
                "weights": { "embedding": 0.0, "amount": 0.6, "currency": 0.2, "date": 0.2 },
                "tolerances": { "amount_tolerance": "0", "group_span_days": 1, "avg_date_delta_days": 2.0 },
                "group_sizes": { "max_group_size_bank": 1, "max_group_size_book": 1 },
                "thresholds": { "min_confidence": 0.9, "max_suggestions": 20, "max_alternatives_per_match": 1 }
            }"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert!(config.bank_filters.is_empty());
        assert_eq!(config.thresholds.auto_apply_score, None);
        assert!(resolve(&config, &ConfigOverrides::default()).is_ok());
    }
}
