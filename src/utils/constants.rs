//! Constants Module - Single Source of Truth
//!
//! Every default, penalty and threshold used across the pipeline is
//! defined here. Other modules import instead of hardcoding values.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::ops::RangeInclusive;

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "RusterCredit";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var pointing at a JSON engine config
pub const ENV_CONFIG_PATH: &str = "RUSTER_CONFIG";

/// Env var overriding the artifact directory
pub const ENV_ARTIFACT_DIR: &str = "RUSTER_ARTIFACT_DIR";

/// Default artifact directory
pub const DEFAULT_ARTIFACT_DIR: &str = "./artifacts";

// ============================================
// FEATURE PROCESSING
// ============================================

/// Imputed value for a column that had no observed value at fit time
pub const EMPTY_COLUMN_IMPUTE_VALUE: f64 = 0.0;

/// Categorical value used when nothing was observed at fit time
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Power iterations per principal component
pub const PCA_POWER_ITERATIONS: usize = 200;

/// Convergence tolerance for power iteration
pub const PCA_TOLERANCE: f64 = 1e-10;

/// Deepest nesting of parentheses, unary minus and exponents in a formula
pub const MAX_FORMULA_DEPTH: usize = 32;

/// Longest formula accepted, in tokens
pub const MAX_FORMULA_TOKENS: usize = 256;

// ============================================
// ENSEMBLE
// ============================================

/// Column prefix for base model outputs in the meta-feature matrix
pub const BASE_MODEL_COLUMN_PREFIX: &str = "bm:";

/// Column prefix for passthrough domain features in the meta-feature matrix
pub const PASSTHROUGH_COLUMN_PREFIX: &str = "pt:";

/// Version tag of the meta-feature column layout scheme
pub const META_LAYOUT_SCHEME: &str = "meta-v1";

/// Default held-out fraction
pub const DEFAULT_TEST_SIZE: f64 = 0.2;

/// Default split seed
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Default probability threshold for positive (default-risk) class
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

/// Default bound on concurrent base model calls
pub const DEFAULT_MAX_PARALLEL_MODELS: usize = 4;

/// Default bound on concurrent entity assessments
pub const DEFAULT_MAX_CONCURRENT_ASSESSMENTS: usize = 32;

// ============================================
// UNCERTAINTY
// ============================================

pub const DEFAULT_DISAGREEMENT_WEIGHT: f64 = 1.0;
pub const DEFAULT_MARGIN_WEIGHT: f64 = 0.3;
/// Margins (log-odds) are normalized by at least this much
pub const DEFAULT_MARGIN_FLOOR: f64 = 4.0;
pub const DEFAULT_FALLBACK_PENALTY: f64 = 0.2;
pub const DEFAULT_FALLBACK_FRACTION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_LOW_ACTIVITY_PENALTY: f64 = 0.1;
pub const DEFAULT_LOW_ACTIVITY_THRESHOLD: f64 = 5.0;
pub const DEFAULT_ACTIVITY_FEATURE: &str = "transaction_count";
/// Added in full when every base model is degraded
pub const DEFAULT_DEGRADED_MODEL_PENALTY: f64 = 0.6;

// ============================================
// ASSESSMENT
// ============================================

/// Scores in this window are gray-area
pub const REVIEW_SCORE_WINDOW: RangeInclusive<f64> = 40.0..=60.0;

/// Below this confidence an assessment needs review
pub const REVIEW_CONFIDENCE_FLOOR: f64 = 0.5;

/// Rule id / title of the fallback recommendation
pub const FALLBACK_RULE_ID: &str = "maintain_status";
pub const FALLBACK_TITLE: &str = "Maintain Current Status";
pub const FALLBACK_DESCRIPTION: &str =
    "No specific action required. Keep your current collateral and repayment behaviour.";

// ============================================
// LENDING DOMAIN FEATURES
// ============================================

pub const FEATURE_COLLATERAL_RATIO: &str = "collateral_ratio";
pub const FEATURE_REPAYMENT_RATIO: &str = "repayment_ratio";
pub const FEATURE_TRANSACTION_COUNT: &str = "transaction_count";
pub const FEATURE_IDENTITY_VERIFIED: &str = "identity_verified";
pub const FEATURE_WALLET_AGE_DAYS: &str = "wallet_age_days";
pub const FEATURE_TOTAL_BORROWED_USD: &str = "total_borrowed_usd";
pub const FEATURE_LIQUIDATION_COUNT: &str = "liquidation_count";
pub const FEATURE_CHAIN: &str = "chain";
pub const TARGET_DEFAULTED: &str = "defaulted";

lazy_static! {
    /// Documented neutral values for lending features, used by the
    /// scorecard when a feature is not in the context at all.
    pub static ref DOMAIN_FEATURE_DEFAULTS: HashMap<&'static str, f64> = {
        let mut m = HashMap::new();
        m.insert(FEATURE_COLLATERAL_RATIO, 1.5);
        m.insert(FEATURE_REPAYMENT_RATIO, 0.7);
        m.insert(FEATURE_TRANSACTION_COUNT, 10.0);
        m.insert(FEATURE_IDENTITY_VERIFIED, 0.0);
        m.insert(FEATURE_WALLET_AGE_DAYS, 90.0);
        m.insert(FEATURE_TOTAL_BORROWED_USD, 0.0);
        m.insert(FEATURE_LIQUIDATION_COUNT, 0.0);
        m
    };
}

/// Neutral value for a domain feature (0.0 when undocumented)
pub fn domain_default(feature: &str) -> f64 {
    DOMAIN_FEATURE_DEFAULTS.get(feature).copied().unwrap_or(0.0)
}
