//! Ruster Credit Library
//!
//! Stacking-ensemble risk scoring for lending decisions:
//! - Feature engineering with restricted derived-feature formulas
//! - Pluggable base models fused by a trained meta-learner
//! - Uncertainty from model disagreement, decision margin and data provenance
//! - Ordered risk bands and rule-driven recommendations
//! - Versioned model artifacts with atomic activation

pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::{
    BaseModel, FeatureProcessor, RecommendationEngine, RiskClassifier, RiskEngine, StackingEnsemble,
    TrainingReport, UncertaintyEstimator,
};
pub use crate::models::{
    AppError, AppResult, EngineConfig, ErrorCode, FeatureValue, FeatureVector, ImpactLevel, Recommendation,
    RiskAssessment, RiskReport,
};
pub use crate::utils::{ModelRegistry, PipelineStats, PipelineTelemetry};
