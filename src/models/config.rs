//! Configuration module for the scoring pipeline
//!
//! Uses constants from utils/constants.rs. Every section can be carried in
//! a JSON file (`RUSTER_CONFIG`); anything omitted falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::classifier::RiskBandTable;
use crate::core::formula::Expr;
use crate::core::recommendation::{default_rules, RecommendationRule};
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::*;

// ============================================
// FEATURE CONFIG
// ============================================

/// Derived feature: `{name, formula, default_value}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatureSpec {
    pub name: String,
    pub formula: String,
    pub default_value: f64,
}

impl DerivedFeatureSpec {
    pub fn new(name: &str, formula: &str, default_value: f64) -> Self {
        Self {
            name: name.to_string(),
            formula: formula.to_string(),
            default_value,
        }
    }

    /// Parse the formula into its AST
    pub fn compile(&self) -> AppResult<Expr> {
        Expr::parse(&self.formula).map_err(|e| {
            AppError::formula_parse(format!("derived feature '{}': {}", self.name, e.message))
        })
    }
}

/// Per-feature transform applied before imputation/scaling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureScalingSpec {
    #[serde(default)]
    pub log_transform: bool,
    #[serde(default)]
    pub clip_lower: Option<f64>,
    #[serde(default)]
    pub clip_upper: Option<f64>,
}

impl FeatureScalingSpec {
    pub fn log() -> Self {
        Self {
            log_transform: true,
            ..Default::default()
        }
    }

    pub fn clip(lower: f64, upper: f64) -> Self {
        Self {
            log_transform: false,
            clip_lower: Some(lower),
            clip_upper: Some(upper),
        }
    }

    /// Signed log1p first, then clipping
    pub fn apply(&self, value: f64) -> f64 {
        let mut v = value;
        if self.log_transform {
            v = v.signum() * v.abs().ln_1p();
        }
        if let Some(lo) = self.clip_lower {
            v = v.max(lo);
        }
        if let Some(hi) = self.clip_upper {
            v = v.min(hi);
        }
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    #[default]
    Median,
    MostFrequent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    #[default]
    Standard,
    MinMax,
    Robust,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionSpec {
    /// Number of principal components to keep
    pub components: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub numerical_features: Vec<String>,
    #[serde(default)]
    pub categorical_features: Vec<String>,
    #[serde(default)]
    pub derived_features: Vec<DerivedFeatureSpec>,
    #[serde(default)]
    pub feature_scaling: BTreeMap<String, FeatureScalingSpec>,
    #[serde(default = "default_target")]
    pub target_feature: String,
    /// Raw columns whose absence fails `transform` with FEATURE_MISSING
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub imputation: ImputeStrategy,
    #[serde(default)]
    pub scaler: ScalerKind,
    #[serde(default)]
    pub reduction: Option<ReductionSpec>,
}

fn default_target() -> String {
    TARGET_DEFAULTED.to_string()
}

impl FeatureConfig {
    /// Lending feature set
    pub fn lending() -> Self {
        let mut feature_scaling = BTreeMap::new();
        feature_scaling.insert(FEATURE_TRANSACTION_COUNT.to_string(), FeatureScalingSpec::log());
        feature_scaling.insert(FEATURE_TOTAL_BORROWED_USD.to_string(), FeatureScalingSpec::log());
        feature_scaling.insert(FEATURE_WALLET_AGE_DAYS.to_string(), FeatureScalingSpec::log());
        feature_scaling.insert(FEATURE_COLLATERAL_RATIO.to_string(), FeatureScalingSpec::clip(0.0, 10.0));
        feature_scaling.insert(FEATURE_REPAYMENT_RATIO.to_string(), FeatureScalingSpec::clip(0.0, 1.0));

        Self {
            numerical_features: vec![
                FEATURE_COLLATERAL_RATIO.to_string(),
                FEATURE_REPAYMENT_RATIO.to_string(),
                FEATURE_TRANSACTION_COUNT.to_string(),
                FEATURE_IDENTITY_VERIFIED.to_string(),
                FEATURE_WALLET_AGE_DAYS.to_string(),
                FEATURE_TOTAL_BORROWED_USD.to_string(),
                FEATURE_LIQUIDATION_COUNT.to_string(),
            ],
            categorical_features: vec![FEATURE_CHAIN.to_string()],
            derived_features: vec![
                DerivedFeatureSpec::new(
                    "activity_rate",
                    "transaction_count / max(wallet_age_days, 1)",
                    0.0,
                ),
                DerivedFeatureSpec::new("collateral_buffer", "collateral_ratio - 1", 0.5),
                DerivedFeatureSpec::new(
                    "repayment_strength",
                    "repayment_ratio * log1p(transaction_count)",
                    0.0,
                ),
            ],
            feature_scaling,
            target_feature: default_target(),
            required_features: vec![FEATURE_COLLATERAL_RATIO.to_string()],
            imputation: ImputeStrategy::Median,
            scaler: ScalerKind::Standard,
            reduction: None,
        }
    }

    /// Numerical + derived column names in output order
    pub fn numeric_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.numerical_features.clone();
        for d in &self.derived_features {
            if !cols.contains(&d.name) {
                cols.push(d.name.clone());
            }
        }
        cols
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.numerical_features.is_empty() && self.derived_features.is_empty() {
            return Err(AppError::invalid_config("feature_config declares no numerical features"));
        }

        let mut seen = HashSet::new();
        for name in self.numerical_features.iter().chain(self.categorical_features.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(AppError::invalid_config(format!("feature '{}' declared twice", name)));
            }
        }
        for spec in &self.derived_features {
            if !seen.insert(spec.name.as_str()) {
                return Err(AppError::invalid_config(format!(
                    "derived feature '{}' collides with another feature",
                    spec.name
                )));
            }
            if !spec.default_value.is_finite() {
                return Err(AppError::invalid_config(format!(
                    "derived feature '{}' has a non-finite default",
                    spec.name
                )));
            }
            spec.compile()?;
        }

        for required in &self.required_features {
            if !self.numerical_features.contains(required) && !self.categorical_features.contains(required) {
                return Err(AppError::invalid_config(format!(
                    "required feature '{}' must be a raw numerical or categorical feature",
                    required
                )));
            }
        }

        for (name, spec) in &self.feature_scaling {
            if let (Some(lo), Some(hi)) = (spec.clip_lower, spec.clip_upper) {
                if lo > hi {
                    return Err(AppError::invalid_config(format!(
                        "feature_scaling.{}: clip_lower > clip_upper",
                        name
                    )));
                }
            }
        }

        if let Some(reduction) = &self.reduction {
            let available = self.numeric_columns().len();
            if reduction.components == 0 || reduction.components > available {
                return Err(AppError::invalid_config(format!(
                    "reduction.components must be in 1..={}",
                    available
                )));
            }
        }

        Ok(())
    }
}

// ============================================
// ENSEMBLE CONFIG
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaLearnerKind {
    #[default]
    LogisticRegression,
    TreeEnsemble,
}

/// `{type, hyperparameters}`; hyperparameters are learner-specific
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaLearnerSpec {
    #[serde(rename = "type", default)]
    pub kind: MetaLearnerKind,
    #[serde(default)]
    pub hyperparameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Base model names in meta-feature column order. Empty = registration order.
    #[serde(default)]
    pub base_models: Vec<String>,
    #[serde(default)]
    pub meta_learner: MetaLearnerSpec,
    #[serde(default)]
    pub passthrough_features: Vec<String>,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
    #[serde(default = "default_true")]
    pub use_uncertainty: bool,
    #[serde(default = "default_max_parallel_models")]
    pub max_parallel_models: usize,
}

fn default_test_size() -> f64 {
    DEFAULT_TEST_SIZE
}
fn default_random_seed() -> u64 {
    DEFAULT_RANDOM_SEED
}
fn default_decision_threshold() -> f64 {
    DEFAULT_DECISION_THRESHOLD
}
fn default_true() -> bool {
    true
}
fn default_max_parallel_models() -> usize {
    DEFAULT_MAX_PARALLEL_MODELS
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            base_models: Vec::new(),
            meta_learner: MetaLearnerSpec::default(),
            passthrough_features: Vec::new(),
            test_size: DEFAULT_TEST_SIZE,
            random_seed: DEFAULT_RANDOM_SEED,
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
            use_uncertainty: true,
            max_parallel_models: DEFAULT_MAX_PARALLEL_MODELS,
        }
    }
}

impl EnsembleConfig {
    /// Scorecard + linear base models, logistic meta-learner, collateral and
    /// repayment passed through
    pub fn lending() -> Self {
        let mut hyperparameters = serde_json::Map::new();
        hyperparameters.insert("learning_rate".into(), serde_json::json!(0.5));
        hyperparameters.insert("max_iter".into(), serde_json::json!(3000));
        hyperparameters.insert("l2".into(), serde_json::json!(0.001));

        Self {
            base_models: vec!["scorecard".to_string(), "linear".to_string()],
            meta_learner: MetaLearnerSpec {
                kind: MetaLearnerKind::LogisticRegression,
                hyperparameters,
            },
            passthrough_features: vec![
                FEATURE_COLLATERAL_RATIO.to_string(),
                FEATURE_REPAYMENT_RATIO.to_string(),
            ],
            ..Default::default()
        }
    }

    pub fn validate(&self, features: &FeatureConfig) -> AppResult<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(AppError::invalid_config("ensemble_config.test_size must be in (0, 1)"));
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return Err(AppError::invalid_config(
                "ensemble_config.decision_threshold must be in (0, 1)",
            ));
        }
        if self.max_parallel_models == 0 {
            return Err(AppError::invalid_config("ensemble_config.max_parallel_models must be >= 1"));
        }
        let mut names = HashSet::new();
        for name in &self.base_models {
            if !names.insert(name) {
                return Err(AppError::invalid_config(format!("base model '{}' listed twice", name)));
            }
        }
        let numeric = features.numeric_columns();
        for pt in &self.passthrough_features {
            if !numeric.contains(pt) {
                return Err(AppError::invalid_config(format!(
                    "passthrough feature '{}' is not a numerical or derived feature",
                    pt
                )));
            }
        }
        Ok(())
    }
}

// ============================================
// RISK BANDS / UNCERTAINTY
// ============================================

/// One band `[min, max)` of the risk band table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBandSpec {
    pub min: f64,
    pub max: f64,
    pub label: String,
}

impl RiskBandSpec {
    pub fn new(min: f64, max: f64, label: &str) -> Self {
        Self {
            min,
            max,
            label: label.to_string(),
        }
    }
}

/// Default lending bands
pub fn default_risk_bands() -> Vec<RiskBandSpec> {
    vec![
        RiskBandSpec::new(0.0, 20.0, "Very Low Risk"),
        RiskBandSpec::new(20.0, 40.0, "Low Risk"),
        RiskBandSpec::new(40.0, 60.0, "Medium Risk"),
        RiskBandSpec::new(60.0, 76.0, "High Risk"),
        RiskBandSpec::new(76.0, 100.0, "Very High Risk"),
    ]
}

/// Weights and penalties of the uncertainty signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub disagreement_weight: f64,
    pub margin_weight: f64,
    pub margin_floor: f64,
    pub fallback_penalty: f64,
    pub fallback_fraction_threshold: f64,
    pub low_activity_penalty: f64,
    pub low_activity_threshold: f64,
    pub activity_feature: String,
    pub degraded_model_penalty: f64,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            disagreement_weight: DEFAULT_DISAGREEMENT_WEIGHT,
            margin_weight: DEFAULT_MARGIN_WEIGHT,
            margin_floor: DEFAULT_MARGIN_FLOOR,
            fallback_penalty: DEFAULT_FALLBACK_PENALTY,
            fallback_fraction_threshold: DEFAULT_FALLBACK_FRACTION_THRESHOLD,
            low_activity_penalty: DEFAULT_LOW_ACTIVITY_PENALTY,
            low_activity_threshold: DEFAULT_LOW_ACTIVITY_THRESHOLD,
            activity_feature: DEFAULT_ACTIVITY_FEATURE.to_string(),
            degraded_model_penalty: DEFAULT_DEGRADED_MODEL_PENALTY,
        }
    }
}

impl UncertaintyConfig {
    pub fn validate(&self) -> AppResult<()> {
        let weights = [
            ("disagreement_weight", self.disagreement_weight),
            ("margin_weight", self.margin_weight),
            ("fallback_penalty", self.fallback_penalty),
            ("low_activity_penalty", self.low_activity_penalty),
            ("degraded_model_penalty", self.degraded_model_penalty),
        ];
        for (name, w) in weights {
            if !(w.is_finite() && w >= 0.0) {
                return Err(AppError::invalid_config(format!("uncertainty.{} must be >= 0", name)));
            }
        }
        if !(self.margin_floor > 0.0) {
            return Err(AppError::invalid_config("uncertainty.margin_floor must be > 0"));
        }
        Ok(())
    }
}

// ============================================
// ENGINE CONFIG
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "FeatureConfig::lending")]
    pub feature_config: FeatureConfig,
    #[serde(default = "EnsembleConfig::lending")]
    pub ensemble_config: EnsembleConfig,
    #[serde(default = "default_risk_bands")]
    pub risk_bands: Vec<RiskBandSpec>,
    #[serde(default)]
    pub uncertainty: UncertaintyConfig,
    #[serde(default = "default_rules")]
    pub recommendation_rules: Vec<RecommendationRule>,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_max_concurrent_assessments")]
    pub max_concurrent_assessments: usize,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_DIR)
}

fn default_max_concurrent_assessments() -> usize {
    DEFAULT_MAX_CONCURRENT_ASSESSMENTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feature_config: FeatureConfig::lending(),
            ensemble_config: EnsembleConfig::lending(),
            risk_bands: default_risk_bands(),
            uncertainty: UncertaintyConfig::default(),
            recommendation_rules: default_rules(),
            artifact_dir: default_artifact_dir(),
            max_concurrent_assessments: DEFAULT_MAX_CONCURRENT_ASSESSMENTS,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::with_source(
                ErrorCode::ConfigInvalidValue,
                format!("Cannot read config {}", path.display()),
                e,
            )
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::with_source(
                ErrorCode::ConfigInvalidValue,
                format!("Cannot parse config {}", path.display()),
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Config file from `RUSTER_CONFIG` (defaults otherwise), then
    /// `RUSTER_ARTIFACT_DIR` override
    pub fn load() -> AppResult<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => {
                info!("⚙️ Loading config from {}", path);
                Self::from_json_file(Path::new(&path))?
            }
            _ => {
                info!("⚙️ {} not set, using built-in lending config", ENV_CONFIG_PATH);
                Self::default()
            }
        };

        if let Ok(dir) = std::env::var(ENV_ARTIFACT_DIR) {
            if !dir.is_empty() {
                config.artifact_dir = PathBuf::from(dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.feature_config.validate()?;
        self.ensemble_config.validate(&self.feature_config)?;
        RiskBandTable::new(&self.risk_bands)?;
        self.uncertainty.validate()?;
        if self.max_concurrent_assessments == 0 {
            return Err(AppError::invalid_config("max_concurrent_assessments must be >= 1"));
        }
        let mut ids = HashSet::new();
        for rule in &self.recommendation_rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(AppError::invalid_config(format!("recommendation rule '{}' listed twice", rule.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_scaling_spec_order() {
        // log first, then clip
        let spec = FeatureScalingSpec {
            log_transform: true,
            clip_lower: None,
            clip_upper: Some(1.0),
        };
        assert_eq!(spec.apply(100.0), 1.0);
        assert!((spec.apply(0.5) - 0.5f64.ln_1p()).abs() < 1e-12);
        assert!((spec.apply(-3.0) + 3.0f64.ln_1p()).abs() < 1e-12);
    }

    #[test]
    fn test_bad_formula_rejected() {
        let mut config = EngineConfig::default();
        config
            .feature_config
            .derived_features
            .push(DerivedFeatureSpec::new("bad", "exec(1)", 0.0));
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::FormulaParse);
    }

    #[test]
    fn test_required_must_be_raw() {
        let mut config = EngineConfig::default();
        config.feature_config.required_features = vec!["activity_rate".to_string()];
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::ConfigInvalidValue);
    }

    #[test]
    fn test_json_partial_config() {
        let json = r#"{
            "ensemble_config": {
                "base_models": ["scorecard"],
                "meta_learner": {"type": "tree_ensemble", "hyperparameters": {"n_trees": 5}},
                "test_size": 0.3
            }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ensemble_config.meta_learner.kind, MetaLearnerKind::TreeEnsemble);
        assert_eq!(config.ensemble_config.random_seed, DEFAULT_RANDOM_SEED);
        assert_eq!(config.feature_config, FeatureConfig::lending());
        assert_eq!(config.risk_bands.len(), 5);
        config.validate().unwrap();
    }
}
