//! Uncertainty Estimator
//!
//! Per-row uncertainty in `[0, 1]`, the sum of three independent signals:
//! 1. Disagreement between the two primary base models
//! 2. Closeness to the meta-learner's decision boundary (when it has margins)
//! 3. Data provenance: fallback rows, thin activity, degraded base models
//!
//! A signal that cannot be computed contributes 0 and is logged at debug.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ensemble::MetaFrame;
use crate::core::pipeline::Frame;
use crate::models::config::UncertaintyConfig;
use crate::models::errors::{AppError, AppResult};

/// Per-signal contributions for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UncertaintySignals {
    pub disagreement: Vec<f64>,
    pub margin: Vec<f64>,
    pub provenance: Vec<f64>,
}

impl UncertaintySignals {
    /// Clipped sum per row
    pub fn total(&self) -> Vec<f64> {
        self.disagreement
            .iter()
            .zip(&self.margin)
            .zip(&self.provenance)
            .map(|((d, m), p)| (d + m + p).clamp(0.0, 1.0))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct UncertaintyEstimator {
    config: UncertaintyConfig,
    enabled: bool,
}

impl UncertaintyEstimator {
    pub fn new(config: UncertaintyConfig, enabled: bool) -> Self {
        Self { config, enabled }
    }

    /// Uncertainty per row; all zeros when disabled
    pub fn estimate(&self, frame: &Frame, meta: &MetaFrame, margins: Option<&[f64]>) -> Vec<f64> {
        self.signals(frame, meta, margins).total()
    }

    pub fn signals(&self, frame: &Frame, meta: &MetaFrame, margins: Option<&[f64]>) -> UncertaintySignals {
        let n = frame.len();
        if !self.enabled {
            return UncertaintySignals {
                disagreement: vec![0.0; n],
                margin: vec![0.0; n],
                provenance: vec![0.0; n],
            };
        }

        UncertaintySignals {
            disagreement: Self::guard("disagreement", n, self.disagreement(meta)),
            margin: Self::guard("margin", n, self.margin(margins, n)),
            provenance: Self::guard("provenance", n, self.provenance(frame, meta)),
        }
    }

    fn guard(signal: &str, n: usize, result: AppResult<Vec<f64>>) -> Vec<f64> {
        match result {
            Ok(v) if v.len() == n && v.iter().all(|x| x.is_finite()) => v,
            Ok(v) => {
                debug!("Uncertainty signal '{}' malformed ({} values for {} rows), using 0", signal, v.len(), n);
                vec![0.0; n]
            }
            Err(e) => {
                debug!("Uncertainty signal '{}' skipped: {}", signal, e);
                vec![0.0; n]
            }
        }
    }

    /// `w · |p1 - p2|` over the first two base models
    fn disagreement(&self, meta: &MetaFrame) -> AppResult<Vec<f64>> {
        let (first, second) = match meta.outputs.as_slice() {
            [a, b, ..] => (a, b),
            _ => return Err(AppError::model_not_ready("fewer than two base models")),
        };
        if first.degraded || second.degraded {
            return Err(AppError::base_model_failed(
                if first.degraded { &first.model } else { &second.model },
                "primary model degraded",
            ));
        }
        Ok(first
            .scores
            .iter()
            .zip(&second.scores)
            .map(|(a, b)| self.config.disagreement_weight * (a - b).abs())
            .collect())
    }

    /// `w · (1 - |m| / max(max_batch |m|, floor))`
    fn margin(&self, margins: Option<&[f64]>, n: usize) -> AppResult<Vec<f64>> {
        let Some(margins) = margins else {
            return Ok(vec![0.0; n]);
        };
        if margins.len() != n {
            return Err(AppError::model_not_ready("margin count does not match rows"));
        }
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(AppError::model_not_ready("non-finite margin"));
        }
        let max_abs = margins.iter().fold(0.0f64, |acc, m| acc.max(m.abs()));
        let denom = max_abs.max(self.config.margin_floor);
        Ok(margins
            .iter()
            .map(|m| self.config.margin_weight * (1.0 - m.abs() / denom))
            .collect())
    }

    /// Fallback rows, low activity (absent counts as low), degraded models
    fn provenance(&self, frame: &Frame, meta: &MetaFrame) -> AppResult<Vec<f64>> {
        let degraded = self.config.degraded_model_penalty * meta.degraded_fraction();
        Ok(frame
            .provenance
            .iter()
            .zip(&frame.contexts)
            .map(|(prov, ctx)| {
                let mut u = degraded;
                if prov.is_fallback(self.config.fallback_fraction_threshold) {
                    u += self.config.fallback_penalty;
                }
                let activity = ctx.get(&self.config.activity_feature).copied();
                if activity.map(|a| a < self.config.low_activity_threshold).unwrap_or(true) {
                    u += self.config.low_activity_penalty;
                }
                u
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{BaseModelOutput, RowProvenance};
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn frame(activity: &[Option<f64>], provenance: Vec<RowProvenance>) -> Frame {
        let n = activity.len();
        Frame {
            entity_ids: (0..n).map(|i| i.to_string()).collect(),
            scaled_columns: vec![],
            scaled: Array2::zeros((n, 0)),
            model_columns: vec![],
            matrix: Array2::zeros((n, 0)),
            categorical: vec![BTreeMap::new(); n],
            contexts: activity
                .iter()
                .map(|a| a.map(|v| [("transaction_count".to_string(), v)].into_iter().collect()).unwrap_or_default())
                .collect(),
            provenance,
            layout_version: "t".into(),
        }
    }

    fn output(name: &str, scores: Vec<f64>, degraded: bool) -> BaseModelOutput {
        BaseModelOutput {
            model: name.into(),
            scores,
            importance: None,
            degraded,
            error: None,
        }
    }

    fn meta(outputs: Vec<BaseModelOutput>) -> MetaFrame {
        let degraded_models = outputs.iter().filter(|o| o.degraded).map(|o| o.model.clone()).collect();
        MetaFrame {
            columns: vec![],
            layout: "t".into(),
            rows: Array2::zeros((0, 0)),
            outputs,
            degraded_models,
        }
    }

    #[test]
    fn test_disagreement_and_margin() {
        let est = UncertaintyEstimator::new(UncertaintyConfig::default(), true);
        let f = frame(&[Some(50.0), Some(50.0)], vec![Default::default(); 2]);
        let m = meta(vec![output("a", vec![0.1, 0.9], false), output("b", vec![0.3, 0.1], false)]);
        let s = est.signals(&f, &m, Some(&[8.0, 0.0]));
        assert!((s.disagreement[0] - 0.2).abs() < 1e-12);
        assert!((s.disagreement[1] - 0.8).abs() < 1e-12);
        assert_eq!(s.margin[0], 0.0);
        assert!((s.margin[1] - 0.3).abs() < 1e-12);
        assert_eq!(s.provenance, vec![0.0, 0.0]);
        let total = s.total();
        assert!((total[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degraded_models_raise_uncertainty() {
        let est = UncertaintyEstimator::new(UncertaintyConfig::default(), true);
        let f = frame(&[Some(50.0)], vec![Default::default()]);
        let m = meta(vec![output("a", vec![0.0], true), output("b", vec![0.0], true)]);
        let u = est.estimate(&f, &m, None);
        assert!(u[0] >= 0.6);
    }

    #[test]
    fn test_provenance_penalties() {
        let est = UncertaintyEstimator::new(UncertaintyConfig::default(), true);
        let fallback = RowProvenance {
            fallback_inputs: 1,
            ..Default::default()
        };
        let f = frame(&[Some(2.0), None], vec![fallback, Default::default()]);
        let m = meta(vec![output("a", vec![0.5, 0.5], false)]);
        let s = est.signals(&f, &m, None);
        assert!((s.provenance[0] - 0.3).abs() < 1e-12);
        assert!((s.provenance[1] - 0.1).abs() < 1e-12);
        // single model: disagreement skipped
        assert_eq!(s.disagreement, vec![0.0, 0.0]);
    }

    #[test]
    fn test_disabled_is_zero() {
        let est = UncertaintyEstimator::new(UncertaintyConfig::default(), false);
        let f = frame(&[None], vec![Default::default()]);
        let m = meta(vec![output("a", vec![0.0], true)]);
        assert_eq!(est.estimate(&f, &m, Some(&[0.0])), vec![0.0]);
    }

    #[test]
    fn test_bad_margins_contribute_nothing() {
        let est = UncertaintyEstimator::new(UncertaintyConfig::default(), true);
        let f = frame(&[Some(50.0)], vec![Default::default()]);
        let m = meta(vec![]);
        assert_eq!(est.estimate(&f, &m, Some(&[f64::NAN])), vec![0.0]);
    }
}
