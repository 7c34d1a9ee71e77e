//! Base Models
//!
//! A base model is an opaque predictor: it takes a clean `Frame` and returns
//! one probability per row. The ensemble never trusts it, see
//! `StackingEnsemble::get_base_predictions`.
//!
//! Two reference predictors ship with the crate:
//! - `ScorecardModel` - weighted rules of thumb over natural-unit features,
//!   starting from a neutral 50 points
//! - `LinearModel` - fixed logistic coefficients over scaled columns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::pipeline::Frame;
use crate::core::recommendation::CompareOp;
use crate::models::errors::{AppError, AppResult};
use crate::utils::constants::*;

/// Pluggable predictor contributing one column to the meta-feature matrix
pub trait BaseModel: Send + Sync {
    /// Unique name, used for the `bm:<name>` meta column
    fn name(&self) -> &str;

    /// Probability of default per row; must return `frame.len()` values
    fn score(&self, frame: &Frame) -> AppResult<Vec<f64>>;

    /// Capability flag for `feature_importance`
    fn supports_importance(&self) -> bool {
        false
    }

    fn feature_importance(&self) -> Option<BTreeMap<String, f64>> {
        None
    }

    /// Serializable artifact, stored as `base_models/<name>.json`
    fn artifact(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Numerically stable logistic function
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// ============================================
// SCORECARD
// ============================================

/// One weighted condition: `feature <op> threshold` adds `weight` points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardRule {
    pub feature: String,
    pub op: CompareOp,
    pub threshold: f64,
    pub weight: f64,
}

impl ScorecardRule {
    pub fn new(feature: &str, op: CompareOp, threshold: f64, weight: f64) -> Self {
        Self {
            feature: feature.to_string(),
            op,
            threshold,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardModel {
    pub name: String,
    /// Starting points (neutral)
    pub base_points: f64,
    /// Points spread mapped to one unit of log-odds
    pub points_per_logit: f64,
    pub rules: Vec<ScorecardRule>,
}

impl ScorecardModel {
    /// Lending scorecard: collateral, repayment, activity, identity, history
    pub fn lending() -> Self {
        use CompareOp::*;
        Self {
            name: "scorecard".to_string(),
            base_points: 50.0,
            points_per_logit: 10.0,
            rules: vec![
                ScorecardRule::new(FEATURE_COLLATERAL_RATIO, Lt, 1.5, 25.0),
                ScorecardRule::new(FEATURE_COLLATERAL_RATIO, Ge, 2.0, -20.0),
                ScorecardRule::new(FEATURE_REPAYMENT_RATIO, Lt, 0.6, 30.0),
                ScorecardRule::new(FEATURE_REPAYMENT_RATIO, Ge, 0.9, -20.0),
                ScorecardRule::new(FEATURE_TRANSACTION_COUNT, Lt, 5.0, 15.0),
                ScorecardRule::new(FEATURE_TRANSACTION_COUNT, Ge, 30.0, -10.0),
                ScorecardRule::new(FEATURE_IDENTITY_VERIFIED, Lt, 0.5, 10.0),
                ScorecardRule::new(FEATURE_IDENTITY_VERIFIED, Ge, 0.5, -10.0),
                ScorecardRule::new(FEATURE_LIQUIDATION_COUNT, Gt, 0.0, 20.0),
            ],
        }
    }

    /// Raw points for one row. Features absent from the context use their
    /// documented domain default.
    pub fn points(&self, context: &BTreeMap<String, f64>) -> f64 {
        self.rules.iter().fold(self.base_points, |acc, rule| {
            let value = context
                .get(&rule.feature)
                .copied()
                .unwrap_or_else(|| domain_default(&rule.feature));
            if rule.op.apply(value, rule.threshold) {
                acc + rule.weight
            } else {
                acc
            }
        })
    }
}

impl BaseModel for ScorecardModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
        if self.points_per_logit <= 0.0 {
            return Err(AppError::base_model_failed(&self.name, "points_per_logit must be > 0"));
        }
        let scores = frame
            .contexts
            .iter()
            .map(|ctx| {
                let points = self.points(ctx);
                sigmoid((points - self.base_points) / self.points_per_logit)
            })
            .collect::<Vec<_>>();
        debug!("📋 Scorecard scored {} rows", scores.len());
        Ok(scores)
    }

    fn supports_importance(&self) -> bool {
        true
    }

    /// Total absolute points per feature
    fn feature_importance(&self) -> Option<BTreeMap<String, f64>> {
        let mut importance = BTreeMap::new();
        for rule in &self.rules {
            *importance.entry(rule.feature.clone()).or_insert(0.0) += rule.weight.abs();
        }
        Some(importance)
    }

    fn artifact(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

// ============================================
// LINEAR MODEL
// ============================================

/// `sigmoid(intercept + Σ wᵢ·xᵢ)` over named scaled columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub name: String,
    pub intercept: f64,
    pub coefficients: BTreeMap<String, f64>,
}

impl LinearModel {
    pub fn new(name: &str, intercept: f64, coefficients: BTreeMap<String, f64>) -> Self {
        Self {
            name: name.to_string(),
            intercept,
            coefficients,
        }
    }

    /// Lending coefficients over standardized columns
    pub fn lending() -> Self {
        let coefficients = [
            (FEATURE_COLLATERAL_RATIO, -1.5),
            (FEATURE_REPAYMENT_RATIO, -1.5),
            (FEATURE_TRANSACTION_COUNT, -0.8),
            (FEATURE_IDENTITY_VERIFIED, -0.5),
            (FEATURE_LIQUIDATION_COUNT, 0.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self::new("linear", 0.0, coefficients)
    }
}

impl BaseModel for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Fails when a weighted column is not in the frame
    fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
        for column in self.coefficients.keys() {
            if frame.value(0, column).is_none() && !frame.is_empty() {
                return Err(AppError::base_model_failed(
                    &self.name,
                    format!("column '{}' not in frame", column),
                ));
            }
        }

        Ok((0..frame.len())
            .map(|row| {
                let z = self.coefficients.iter().fold(self.intercept, |acc, (column, w)| {
                    acc + w * frame.value(row, column).unwrap_or(0.0)
                });
                sigmoid(z)
            })
            .collect())
    }

    fn supports_importance(&self) -> bool {
        true
    }

    fn feature_importance(&self) -> Option<BTreeMap<String, f64>> {
        Some(self.coefficients.iter().map(|(k, v)| (k.clone(), v.abs())).collect())
    }

    fn artifact(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::FeatureContext;
    use ndarray::Array2;

    fn frame_with_contexts(contexts: Vec<FeatureContext>) -> Frame {
        let n = contexts.len();
        Frame {
            entity_ids: (0..n).map(|i| format!("e{}", i)).collect(),
            scaled_columns: vec![FEATURE_COLLATERAL_RATIO.to_string()],
            scaled: Array2::zeros((n, 1)),
            model_columns: vec![FEATURE_COLLATERAL_RATIO.to_string()],
            matrix: Array2::zeros((n, 1)),
            categorical: vec![BTreeMap::new(); n],
            contexts,
            provenance: vec![Default::default(); n],
            layout_version: "test".to_string(),
        }
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn test_scorecard_good_vs_bad() {
        let scorecard = ScorecardModel::lending();
        let good: FeatureContext = [
            (FEATURE_COLLATERAL_RATIO, 2.5),
            (FEATURE_REPAYMENT_RATIO, 0.95),
            (FEATURE_TRANSACTION_COUNT, 50.0),
            (FEATURE_IDENTITY_VERIFIED, 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let bad: FeatureContext = [
            (FEATURE_COLLATERAL_RATIO, 1.1),
            (FEATURE_REPAYMENT_RATIO, 0.4),
            (FEATURE_TRANSACTION_COUNT, 2.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let scores = scorecard.score(&frame_with_contexts(vec![good, bad])).unwrap();
        assert!(scores[0] < 0.05);
        assert!(scores[1] > 0.95);
    }

    #[test]
    fn test_scorecard_uses_domain_defaults() {
        let scorecard = ScorecardModel::lending();
        let points = scorecard.points(&FeatureContext::new());
        // collateral 1.5, repayment 0.7, tx 10, identity 0, no liquidations
        assert_eq!(points, 60.0);
    }

    #[test]
    fn test_linear_missing_column_fails() {
        let model = LinearModel::lending();
        let err = model.score(&frame_with_contexts(vec![FeatureContext::new()])).unwrap_err();
        assert_eq!(err.code, crate::models::errors::ErrorCode::BaseModelFailed);
    }

    #[test]
    fn test_importance_capability() {
        let model = LinearModel::lending();
        assert!(model.supports_importance());
        assert_eq!(model.feature_importance().unwrap()[FEATURE_COLLATERAL_RATIO], 1.5);
    }
}
