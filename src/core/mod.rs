//! Core Module - Scoring Pipeline
//!
//! Feature engineering, base models, the stacking ensemble, uncertainty,
//! risk bands, recommendations and the engine that ties them together.

pub mod base_model;
pub mod classifier;
pub mod engine;
pub mod ensemble;
pub mod features;
pub mod formula;
pub mod meta_learner;
pub mod pipeline;
pub mod recommendation;
pub mod uncertainty;

pub use base_model::{sigmoid, BaseModel, LinearModel, ScorecardModel, ScorecardRule};
pub use classifier::{RiskBand, RiskBandTable, RiskClassifier};
pub use engine::{RiskEngine, TrainingReport};
pub use ensemble::{ClassificationMetrics, EnsemblePrediction, EnsembleTrainingReport, MetaFrame, StackingEnsemble};
pub use features::{FeatureLayout, FeatureProcessor};
pub use formula::Expr;
pub use meta_learner::{MetaLearner, MetaModel};
pub use pipeline::{Frame, Pipeline};
pub use recommendation::{default_rules, CompareOp, Condition, RecommendationEngine, RecommendationRule};
pub use uncertainty::{UncertaintyEstimator, UncertaintySignals};
