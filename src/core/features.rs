//! Feature Processor
//!
//! Turns raw `FeatureVector`s into a clean `Frame`:
//! 1. Derived features (restricted formulas, declaration order)
//! 2. Per-feature log / clip transforms
//! 3. Imputation, scaling, optional PCA (fitted once, see `pipeline.rs`)
//!
//! A failing formula only affects that feature for that row: the configured
//! default is substituted and one warning per formula per batch is logged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::formula::Expr;
use crate::core::pipeline::{Frame, Pipeline};
use crate::models::config::{DerivedFeatureSpec, FeatureConfig, FeatureScalingSpec};
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{FeatureContext, FeatureVector, RowProvenance};

// ============================================
// COMPILED FEATURE LAYOUT
// ============================================

/// A derived feature with its parsed formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeature {
    pub spec: DerivedFeatureSpec,
    pub expr: Expr,
}

/// Everything needed to turn a raw row into natural-unit and transformed
/// values. Stored inside the fitted `Pipeline` so a persisted pipeline
/// reproduces `transform` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub numerical: Vec<String>,
    pub categorical: Vec<String>,
    pub derived: Vec<DerivedFeature>,
    pub scaling: BTreeMap<String, FeatureScalingSpec>,
    pub required: Vec<String>,
}

impl FeatureLayout {
    pub fn compile(config: &FeatureConfig) -> AppResult<Self> {
        let derived = config
            .derived_features
            .iter()
            .map(|spec| {
                Ok(DerivedFeature {
                    spec: spec.clone(),
                    expr: spec.compile()?,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            numerical: config.numerical_features.clone(),
            categorical: config.categorical_features.clone(),
            derived,
            scaling: config.feature_scaling.clone(),
            required: config.required_features.clone(),
        })
    }

    /// Numerical columns followed by derived columns
    pub fn numeric_columns(&self) -> Vec<String> {
        self.numerical
            .iter()
            .cloned()
            .chain(self.derived.iter().map(|d| d.spec.name.clone()))
            .collect()
    }

    /// FEATURE_MISSING when a required column has no value in any row
    pub fn check_required(&self, batch: &[FeatureVector]) -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for required in &self.required {
            let present = batch
                .iter()
                .any(|row| row.get(required).map(|v| !v.is_missing()).unwrap_or(false));
            if !present {
                return Err(AppError::feature_missing(required));
            }
        }
        Ok(())
    }

    /// Derive, log/clip and collect provenance for every row
    pub fn prepare(&self, batch: &[FeatureVector]) -> PreparedBatch {
        let mut failures: Vec<(usize, Option<String>)> = vec![(0, None); self.derived.len()];
        let mut rows = Vec::with_capacity(batch.len());
        let columns = self.numeric_columns();

        for raw in batch {
            let mut natural: BTreeMap<String, f64> = BTreeMap::new();
            let mut provenance = RowProvenance {
                total_columns: self.numerical.len() + self.derived.len(),
                ..Default::default()
            };

            for name in self.numerical.iter().chain(self.categorical.iter()) {
                if raw.get(name).is_some() && raw.fallback_features.contains(name) {
                    provenance.fallback_inputs += 1;
                }
            }

            for name in &self.numerical {
                match raw.number(name) {
                    Some(v) => {
                        natural.insert(name.clone(), v);
                    }
                    None => provenance.imputed += 1,
                }
            }

            for (idx, derived) in self.derived.iter().enumerate() {
                let value = {
                    let lookup = |name: &str| natural.get(name).copied();
                    derived.expr.eval(&lookup)
                };
                let value = match value {
                    Ok(v) => v,
                    Err(e) => {
                        let (count, first) = &mut failures[idx];
                        *count += 1;
                        if first.is_none() {
                            *first = Some(e.message);
                        }
                        provenance.defaulted_derived += 1;
                        derived.spec.default_value
                    }
                };
                natural.insert(derived.spec.name.clone(), value);
            }

            let numeric = columns
                .iter()
                .map(|name| {
                    natural.get(name).map(|v| match self.scaling.get(name) {
                        Some(spec) => spec.apply(*v),
                        None => *v,
                    })
                })
                .collect();

            let categorical = self
                .categorical
                .iter()
                .map(|name| (name.clone(), raw.get(name).and_then(|v| v.as_category())))
                .collect();

            rows.push(PreparedRow {
                entity_id: raw.entity_id.clone(),
                numeric,
                categorical,
                context: natural,
                provenance,
            });
        }

        for (derived, (count, first)) in self.derived.iter().zip(failures) {
            if count > 0 {
                warn!(
                    "⚠️ Derived feature '{}' fell back to {} for {}/{} rows ({})",
                    derived.spec.name,
                    derived.spec.default_value,
                    count,
                    batch.len(),
                    first.unwrap_or_default()
                );
            }
        }

        PreparedBatch { rows }
    }
}

/// One row after derivation and log / clip, before imputation
#[derive(Debug, Clone)]
pub struct PreparedRow {
    pub entity_id: String,
    /// Per numeric column (numerical + derived); `None` = needs imputation
    pub numeric: Vec<Option<f64>>,
    pub categorical: BTreeMap<String, Option<String>>,
    pub context: FeatureContext,
    pub provenance: RowProvenance,
}

#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub rows: Vec<PreparedRow>,
}

impl PreparedBatch {
    /// Observed values of one numeric column
    pub fn observed(&self, column: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r.numeric[column]).collect()
    }
}

// ============================================
// FEATURE PROCESSOR
// ============================================

/// Fits and applies the feature `Pipeline`
#[derive(Debug, Clone)]
pub struct FeatureProcessor {
    config: FeatureConfig,
    layout: FeatureLayout,
}

impl FeatureProcessor {
    /// Compiles every derived formula up front; syntax errors surface here
    pub fn new(config: FeatureConfig) -> AppResult<Self> {
        config.validate()?;
        let layout = FeatureLayout::compile(&config)?;
        Ok(Self { config, layout })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Fit imputer, scaler and reducer on a training batch
    pub fn fit(&self, batch: &[FeatureVector]) -> AppResult<Pipeline> {
        if batch.is_empty() {
            return Err(AppError::invalid_training_data("cannot fit features on an empty batch"));
        }
        self.layout.check_required(batch)?;

        info!(
            "🔧 Fitting feature pipeline on {} rows ({} numeric, {} categorical)",
            batch.len(),
            self.layout.numeric_columns().len(),
            self.layout.categorical.len()
        );

        let prepared = self.layout.prepare(batch);
        let pipeline = Pipeline::fit(
            self.layout.clone(),
            &prepared,
            self.config.imputation,
            self.config.scaler,
            self.config.reduction.as_ref().map(|r| r.components),
        );

        debug!("🔧 Pipeline layout {}", pipeline.layout_version);
        Ok(pipeline)
    }

    /// Reapply a fitted pipeline. Pure: the pipeline is never mutated.
    pub fn transform(&self, pipeline: &Pipeline, batch: &[FeatureVector]) -> AppResult<Frame> {
        pipeline.transform(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::ErrorCode;
    use crate::models::types::FeatureValue;

    fn config() -> FeatureConfig {
        let mut scaling = BTreeMap::new();
        scaling.insert("tx".to_string(), FeatureScalingSpec::log());
        FeatureConfig {
            numerical_features: vec!["a".into(), "b".into(), "tx".into()],
            categorical_features: vec!["chain".into()],
            derived_features: vec![
                DerivedFeatureSpec::new("ratio", "a / b", -1.0),
                DerivedFeatureSpec::new("ratio_sq", "ratio ^ 2", 0.0),
            ],
            feature_scaling: scaling,
            target_feature: "y".into(),
            required_features: vec!["a".into()],
            ..FeatureConfig::lending()
        }
    }

    #[test]
    fn test_derived_in_declaration_order() {
        let layout = FeatureLayout::compile(&config()).unwrap();
        let batch = vec![FeatureVector::new("e1").with("a", 6.0).with("b", 2.0).with("tx", 3.0)];
        let prepared = layout.prepare(&batch);
        let row = &prepared.rows[0];
        assert_eq!(row.context["ratio"], 3.0);
        assert_eq!(row.context["ratio_sq"], 9.0);
        // tx is log-transformed, context keeps natural units
        assert_eq!(row.context["tx"], 3.0);
        assert!((row.numeric[2].unwrap() - 3.0f64.ln_1p()).abs() < 1e-12);
    }

    #[test]
    fn test_formula_failure_uses_default() {
        let layout = FeatureLayout::compile(&config()).unwrap();
        let batch = vec![
            FeatureVector::new("zero").with("a", 1.0).with("b", 0.0),
            FeatureVector::new("absent").with("a", 1.0),
        ];
        let prepared = layout.prepare(&batch);
        for row in &prepared.rows {
            assert_eq!(row.context["ratio"], -1.0);
            assert_eq!(row.context["ratio_sq"], 1.0);
            assert_eq!(row.provenance.defaulted_derived, 1);
        }
        assert_eq!(prepared.rows[1].provenance.imputed, 2);
    }

    #[test]
    fn test_required_feature_absent_everywhere() {
        let processor = FeatureProcessor::new(config()).unwrap();
        let batch = vec![
            FeatureVector::new("e1").with("b", 1.0),
            FeatureVector::new("e2").with("a", FeatureValue::Missing),
        ];
        let err = processor.fit(&batch).unwrap_err();
        assert_eq!(err.code, ErrorCode::FeatureMissing);

        // present in one row is enough
        let batch = vec![FeatureVector::new("e1").with("b", 1.0), FeatureVector::new("e2").with("a", 2.0)];
        assert!(processor.fit(&batch).is_ok());
    }

    #[test]
    fn test_fallback_inputs_counted() {
        let layout = FeatureLayout::compile(&config()).unwrap();
        let batch = vec![FeatureVector::new("e1").with("a", 1.0).with_fallback("b", 2.0)];
        let prepared = layout.prepare(&batch);
        assert_eq!(prepared.rows[0].provenance.fallback_inputs, 1);
    }

    #[test]
    fn test_empty_fit_rejected() {
        let processor = FeatureProcessor::new(config()).unwrap();
        assert_eq!(processor.fit(&[]).unwrap_err().code, ErrorCode::InvalidTrainingData);
    }
}
