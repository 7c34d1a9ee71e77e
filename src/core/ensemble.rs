//! Stacking Ensemble
//!
//! Fuses heterogeneous base models into one calibrated probability:
//!
//! ```text
//! Frame ──► [bm:scorecard, bm:linear, ...] ++ [pt:collateral_ratio, ...] ──► MetaLearner ──► p
//! ```
//!
//! Base models are never trusted. An error, a panic, a wrong row count or a
//! non-finite score turns that model's column into a zero placeholder and
//! records a degraded event; the batch always keeps its row count. Base
//! models run on a dedicated rayon pool sized by `max_parallel_models`.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::base_model::BaseModel;
use crate::core::meta_learner::MetaLearner;
use crate::core::pipeline::Frame;
use crate::models::config::EnsembleConfig;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::BaseModelOutput;
use crate::utils::constants::{BASE_MODEL_COLUMN_PREFIX, META_LAYOUT_SCHEME, PASSTHROUGH_COLUMN_PREFIX};

// ============================================
// META FRAME
// ============================================

/// Meta-feature matrix plus the per-model outputs it was built from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFrame {
    pub columns: Vec<String>,
    pub layout: String,
    /// rows x columns
    pub rows: Array2<f64>,
    /// One output per configured base model, in column order
    pub outputs: Vec<BaseModelOutput>,
    pub degraded_models: Vec<String>,
}

impl MetaFrame {
    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    /// Share of base models replaced by placeholders
    pub fn degraded_fraction(&self) -> f64 {
        if self.outputs.is_empty() {
            return 0.0;
        }
        self.degraded_models.len() as f64 / self.outputs.len() as f64
    }

    fn select(&self, idx: &[usize]) -> Array2<f64> {
        self.rows.select(Axis(0), idx)
    }
}

// ============================================
// METRICS
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassificationMetrics {
    /// Zero division yields 0.0
    pub fn compute(probabilities: &[f64], labels: &[f64], threshold: f64) -> Self {
        let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
        for (p, y) in probabilities.iter().zip(labels) {
            match (*p >= threshold, *y >= 0.5) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }
        let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            accuracy: ratio(tp + tn, tp + fp + tn + fn_),
            precision,
            recall,
            f1,
            support: probabilities.len(),
        }
    }
}

/// Outcome of `StackingEnsemble::train`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleTrainingReport {
    pub metrics: ClassificationMetrics,
    /// "Which base model mattered": meta column -> coefficient / importance
    pub meta_importance: BTreeMap<String, f64>,
    /// Feature importance of base models that support it
    pub base_model_importance: BTreeMap<String, BTreeMap<String, f64>>,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Held-out rows were not available; metrics are on training rows
    pub evaluated_on_training: bool,
    pub degraded_models: Vec<String>,
}

/// Probabilities plus what the uncertainty layer needs
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    pub probabilities: Vec<f64>,
    pub margins: Option<Vec<f64>>,
    pub meta: MetaFrame,
}

// ============================================
// ENSEMBLE
// ============================================

#[derive(Clone)]
pub struct StackingEnsemble {
    config: EnsembleConfig,
    /// Column order; a configured name without a registered model keeps its
    /// column as a permanent placeholder
    model_names: Vec<String>,
    models: BTreeMap<String, Arc<dyn BaseModel>>,
    meta_learner: Option<Arc<MetaLearner>>,
    /// `max_parallel_models` workers, shared by every bound copy
    pool: Arc<ThreadPool>,
}

impl std::fmt::Debug for StackingEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackingEnsemble")
            .field("model_names", &self.model_names)
            .field("passthrough", &self.config.passthrough_features)
            .field("meta_learner", &self.meta_learner.as_ref().map(|m| m.kind_name()))
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl StackingEnsemble {
    pub fn new(config: EnsembleConfig, models: Vec<Arc<dyn BaseModel>>) -> AppResult<Self> {
        let mut registered = BTreeMap::new();
        let mut order = Vec::new();
        for model in models {
            let name = model.name().to_string();
            if registered.insert(name.clone(), model).is_some() {
                return Err(AppError::invalid_config(format!("base model '{}' registered twice", name)));
            }
            order.push(name);
        }

        let model_names = if config.base_models.is_empty() {
            order
        } else {
            for name in &order {
                if !config.base_models.contains(name) {
                    warn!("⚠️ Base model '{}' is registered but not configured, ignoring it", name);
                }
            }
            for name in &config.base_models {
                if !registered.contains_key(name) {
                    warn!("⚠️ Base model '{}' is configured but not registered, column stays degraded", name);
                }
            }
            config.base_models.clone()
        };

        if model_names.is_empty() && config.passthrough_features.is_empty() {
            return Err(AppError::invalid_config("ensemble has neither base models nor passthrough features"));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_parallel_models.max(1))
            .thread_name(|i| format!("base-model-{}", i))
            .build()
            .map_err(|e| AppError::invalid_config(format!("cannot start base-model workers: {}", e)))?;

        Ok(Self {
            config,
            model_names,
            models: registered,
            meta_learner: None,
            pool: Arc::new(pool),
        })
    }

    /// Same ensemble bound to a fitted meta-learner
    pub fn with_meta_learner(&self, learner: Arc<MetaLearner>) -> Self {
        Self {
            meta_learner: Some(learner),
            ..self.clone()
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }

    pub fn base_model(&self, name: &str) -> Option<&Arc<dyn BaseModel>> {
        self.models.get(name)
    }

    pub fn meta_columns(&self) -> Vec<String> {
        self.model_names
            .iter()
            .map(|m| format!("{}{}", BASE_MODEL_COLUMN_PREFIX, m))
            .chain(
                self.config
                    .passthrough_features
                    .iter()
                    .map(|p| format!("{}{}", PASSTHROUGH_COLUMN_PREFIX, p)),
            )
            .collect()
    }

    /// Layout tag a meta-learner must match
    pub fn layout(&self) -> String {
        format!("{}|{}", META_LAYOUT_SCHEME, self.meta_columns().join(","))
    }

    // ============================================
    // BASE PREDICTIONS
    // ============================================

    fn invoke(&self, name: &str, frame: &Frame) -> BaseModelOutput {
        let rows = frame.len();
        let Some(model) = self.models.get(name) else {
            return BaseModelOutput::placeholder(name, rows, "model not registered");
        };

        let result = catch_unwind(AssertUnwindSafe(|| model.score(frame)));
        let failure = match result {
            Ok(Ok(scores)) if scores.len() != rows => {
                format!("returned {} scores for {} rows", scores.len(), rows)
            }
            Ok(Ok(scores)) if scores.iter().any(|s| !s.is_finite()) => "returned non-finite scores".to_string(),
            Ok(Ok(scores)) => {
                let importance = if model.supports_importance() {
                    model.feature_importance()
                } else {
                    None
                };
                return BaseModelOutput {
                    model: name.to_string(),
                    scores: scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect(),
                    importance,
                    degraded: false,
                    error: None,
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "panicked while scoring".to_string(),
        };

        warn!("⚠️ Base model '{}' degraded: {}", name, failure);
        BaseModelOutput::placeholder(name, rows, failure)
    }

    /// Run every base model (bounded by `max_parallel_models`) and assemble
    /// the meta-feature matrix. Never fails.
    pub fn get_base_predictions(&self, frame: &Frame) -> MetaFrame {
        let rows = frame.len();

        // panics are caught per model inside `invoke`
        let outputs: Vec<BaseModelOutput> = self
            .pool
            .install(|| self.model_names.par_iter().map(|name| self.invoke(name, frame)).collect());

        let mut missing_passthrough = Vec::new();
        let passthrough: Vec<Option<usize>> = self
            .config
            .passthrough_features
            .iter()
            .map(|name| {
                let idx = frame.scaled_columns.iter().position(|c| c == name);
                if idx.is_none() {
                    missing_passthrough.push(name.as_str());
                }
                idx
            })
            .collect();
        if !missing_passthrough.is_empty() && rows > 0 {
            warn!(
                "⚠️ Passthrough feature(s) {:?} not in frame, using 0.0",
                missing_passthrough
            );
        }

        let mut meta_rows = Array2::zeros((rows, outputs.len() + passthrough.len()));
        for (c, output) in outputs.iter().enumerate() {
            meta_rows.column_mut(c).iter_mut().zip(&output.scores).for_each(|(m, s)| *m = *s);
        }
        for (j, idx) in passthrough.iter().enumerate() {
            if let Some(i) = idx {
                let source = frame.scaled.column(*i);
                meta_rows
                    .column_mut(outputs.len() + j)
                    .iter_mut()
                    .zip(source.iter())
                    .for_each(|(m, s)| *m = *s);
            }
        }

        let degraded_models: Vec<String> = outputs.iter().filter(|o| o.degraded).map(|o| o.model.clone()).collect();
        debug!(
            "🧩 Meta frame: {} rows, {} columns, {} degraded",
            rows,
            self.meta_columns().len(),
            degraded_models.len()
        );

        MetaFrame {
            columns: self.meta_columns(),
            layout: self.layout(),
            rows: meta_rows,
            outputs,
            degraded_models,
        }
    }

    // ============================================
    // TRAINING
    // ============================================

    fn validate_labels(frame: &Frame, labels: &[f64]) -> AppResult<()> {
        if frame.is_empty() {
            return Err(AppError::invalid_training_data("training batch is empty"));
        }
        if labels.len() != frame.len() {
            return Err(AppError::invalid_training_data(format!(
                "{} labels for {} rows",
                labels.len(),
                frame.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|y| **y != 0.0 && **y != 1.0) {
            return Err(AppError::invalid_training_data(format!("non-binary label {}", bad)));
        }
        let positives = labels.iter().filter(|y| **y == 1.0).count();
        if positives == 0 || positives == labels.len() {
            return Err(AppError::invalid_training_data("labels contain a single class"));
        }
        Ok(())
    }

    /// Fit a new meta-learner. The ensemble itself is not modified.
    pub fn train(&self, frame: &Frame, labels: &[f64]) -> AppResult<(MetaLearner, EnsembleTrainingReport)> {
        Self::validate_labels(frame, labels)?;
        let meta = self.get_base_predictions(frame);

        let n = frame.len();
        let mut idx: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        idx.shuffle(&mut rng);

        let n_test = ((n as f64) * self.config.test_size).round() as usize;
        let n_test = n_test.min(n.saturating_sub(1));
        let (test_idx, train_idx) = idx.split_at(n_test);
        let evaluated_on_training = test_idx.is_empty();
        let eval_idx = if evaluated_on_training { train_idx } else { test_idx };

        let x_train = meta.select(train_idx);
        let y_train: Array1<f64> = train_idx.iter().map(|&i| labels[i]).collect();

        let learner = MetaLearner::fit(
            &self.config.meta_learner,
            self.config.random_seed,
            &meta.layout,
            meta.columns.clone(),
            &x_train,
            &y_train,
        )?;

        let x_eval = meta.select(eval_idx);
        let y_eval: Vec<f64> = eval_idx.iter().map(|&i| labels[i]).collect();
        let metrics = ClassificationMetrics::compute(
            &learner.predict_proba(&x_eval)?,
            &y_eval,
            self.config.decision_threshold,
        );

        info!(
            "📊 Meta-learner eval ({} rows{}): acc={:.3} prec={:.3} rec={:.3} f1={:.3}",
            eval_idx.len(),
            if evaluated_on_training { ", training" } else { "" },
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1
        );

        let base_model_importance = meta
            .outputs
            .iter()
            .filter_map(|o| o.importance.clone().map(|imp| (o.model.clone(), imp)))
            .collect();

        let report = EnsembleTrainingReport {
            metrics,
            meta_importance: learner.importance(),
            base_model_importance,
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            evaluated_on_training,
            degraded_models: meta.degraded_models.clone(),
        };
        Ok((learner, report))
    }

    // ============================================
    // PREDICTION
    // ============================================

    fn loaded_learner(&self) -> AppResult<&MetaLearner> {
        let learner = self
            .meta_learner
            .as_deref()
            .ok_or_else(|| AppError::model_not_ready("no meta-learner loaded"))?;
        if learner.layout != self.layout() {
            return Err(AppError::model_not_ready(format!(
                "meta-learner layout '{}' does not match ensemble layout '{}'",
                learner.layout,
                self.layout()
            )));
        }
        Ok(learner)
    }

    /// Probabilities, margins and the meta frame
    pub fn predict_detailed(&self, frame: &Frame) -> AppResult<EnsemblePrediction> {
        let learner = self.loaded_learner()?;
        let meta = self.get_base_predictions(frame);
        let probabilities = learner.predict_proba(&meta.rows)?;
        let margins = learner.decision_function(&meta.rows)?;
        Ok(EnsemblePrediction {
            probabilities,
            margins,
            meta,
        })
    }

    /// Calibrated probabilities in `[0, 1]`
    pub fn predict(&self, frame: &Frame) -> AppResult<Vec<f64>> {
        Ok(self.predict_detailed(frame)?.probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::base_model::sigmoid;
    use crate::models::errors::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed(&'static str, f64);
    impl BaseModel for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
            Ok(vec![self.1; frame.len()])
        }
    }

    /// Probability from the first scaled column
    struct FromColumn;
    impl BaseModel for FromColumn {
        fn name(&self) -> &str {
            "column"
        }
        fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
            Ok(frame.scaled.column(0).iter().map(|v| sigmoid(4.0 * v)).collect())
        }
    }

    struct Broken;
    impl BaseModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn score(&self, _frame: &Frame) -> AppResult<Vec<f64>> {
            Err(AppError::base_model_failed("broken", "upstream unavailable"))
        }
    }

    struct Panicky;
    impl BaseModel for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn score(&self, _frame: &Frame) -> AppResult<Vec<f64>> {
            panic!("boom")
        }
    }

    struct Short;
    impl BaseModel for Short {
        fn name(&self) -> &str {
            "short"
        }
        fn score(&self, _frame: &Frame) -> AppResult<Vec<f64>> {
            Ok(vec![f64::NAN])
        }
    }

    fn frame(n: usize) -> Frame {
        Frame {
            entity_ids: (0..n).map(|i| format!("e{}", i)).collect(),
            scaled_columns: vec!["x".to_string()],
            scaled: Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / n as f64 - 0.5),
            model_columns: vec!["x".to_string()],
            matrix: Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / n as f64 - 0.5),
            categorical: vec![BTreeMap::new(); n],
            contexts: vec![BTreeMap::new(); n],
            provenance: vec![Default::default(); n],
            layout_version: "t".to_string(),
        }
    }

    fn labels(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect()
    }

    fn config(parallel: usize) -> EnsembleConfig {
        EnsembleConfig {
            passthrough_features: vec!["x".to_string(), "absent".to_string()],
            max_parallel_models: parallel,
            ..Default::default()
        }
    }

    #[test]
    fn test_failures_keep_row_count() {
        for parallel in [1, 2, 8] {
            let ensemble = StackingEnsemble::new(
                config(parallel),
                vec![
                    Arc::new(Fixed("ok", 1.7)),
                    Arc::new(Broken),
                    Arc::new(Panicky),
                    Arc::new(Short),
                ],
            )
            .unwrap();
            let meta = ensemble.get_base_predictions(&frame(10));
            assert_eq!(meta.len(), 10);
            assert_eq!(meta.columns.len(), 6);
            assert_eq!(meta.degraded_models, vec!["broken", "panicky", "short"]);
            // clamped
            assert_eq!(meta.rows[[0, 0]], 1.0);
            // placeholders and absent passthrough are zero
            assert_eq!(meta.rows[[3, 1]], 0.0);
            assert_eq!(meta.rows[[3, 5]], 0.0);
            // passthrough carries the scaled column
            assert_eq!(meta.rows[[3, 4]], 3.0 / 10.0 - 0.5);
            assert!((meta.degraded_fraction() - 0.75).abs() < 1e-12);
        }
    }

    #[test]
    fn test_configured_order_and_unregistered_model() {
        let cfg = EnsembleConfig {
            base_models: vec!["column".to_string(), "ghost".to_string()],
            ..Default::default()
        };
        let ensemble = StackingEnsemble::new(cfg, vec![Arc::new(Fixed("extra", 0.3)), Arc::new(FromColumn)]).unwrap();
        assert_eq!(ensemble.meta_columns(), vec!["bm:column", "bm:ghost"]);
        let meta = ensemble.get_base_predictions(&frame(4));
        assert_eq!(meta.degraded_models, vec!["ghost"]);
    }

    #[test]
    fn test_train_and_predict() {
        let ensemble = StackingEnsemble::new(config(2), vec![Arc::new(FromColumn), Arc::new(Fixed("flat", 0.5))]).unwrap();
        let f = frame(50);
        let (learner, report) = ensemble.train(&f, &labels(50)).unwrap();
        assert_eq!(report.train_rows + report.test_rows, 50);
        assert_eq!(report.test_rows, 10);
        assert!(report.metrics.accuracy > 0.7);
        assert!(report.meta_importance.contains_key("bm:column"));

        let ready = ensemble.with_meta_learner(Arc::new(learner));
        let p = ready.predict(&f).unwrap();
        assert_eq!(p.len(), 50);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(p[49] > p[0]);
    }

    #[test]
    fn test_predict_without_learner() {
        let ensemble = StackingEnsemble::new(config(1), vec![Arc::new(FromColumn)]).unwrap();
        assert_eq!(ensemble.predict(&frame(3)).unwrap_err().code, ErrorCode::ModelNotReady);
    }

    #[test]
    fn test_layout_mismatch_is_not_ready() {
        let a = StackingEnsemble::new(config(1), vec![Arc::new(FromColumn)]).unwrap();
        let (learner, _) = a.train(&frame(20), &labels(20)).unwrap();
        let b = StackingEnsemble::new(config(1), vec![Arc::new(FromColumn), Arc::new(Fixed("more", 0.1))]).unwrap();
        let err = b.with_meta_learner(Arc::new(learner)).predict(&frame(3)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotReady);
    }

    #[test]
    fn test_invalid_training_data() {
        let ensemble = StackingEnsemble::new(config(1), vec![Arc::new(FromColumn)]).unwrap();
        let f = frame(4);
        for bad in [vec![0.0, 1.0], vec![0.0; 4], vec![0.0, 1.0, 2.0, 1.0]] {
            let err = ensemble.train(&f, &bad).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidTrainingData);
        }
        assert_eq!(ensemble.train(&frame(0), &[]).unwrap_err().code, ErrorCode::InvalidTrainingData);
    }

    #[test]
    fn test_tiny_batch_keeps_a_training_row() {
        let cfg = EnsembleConfig {
            test_size: 0.9,
            ..config(1)
        };
        let ensemble = StackingEnsemble::new(cfg, vec![Arc::new(FromColumn)]).unwrap();
        let (_, report) = ensemble.train(&frame(2), &[0.0, 1.0]).unwrap();
        assert_eq!(report.train_rows, 1);
        assert_eq!(report.test_rows, 1);
    }

    #[test]
    fn test_metrics() {
        let m = ClassificationMetrics::compute(&[0.9, 0.8, 0.2, 0.6], &[1.0, 0.0, 0.0, 1.0], 0.5);
        assert_eq!(m.accuracy, 0.75);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.support, 4);
    }

    /// Tracks how many scoring calls overlap
    struct Gate {
        name: String,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }
    impl BaseModel for Gate {
        fn name(&self) -> &str {
            &self.name
        }
        fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.4; frame.len()])
        }
    }

    fn gated(parallel: usize, count: usize) -> (StackingEnsemble, Arc<AtomicUsize>) {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut models: Vec<Arc<dyn BaseModel>> = (0..count)
            .map(|i| {
                Arc::new(Gate {
                    name: format!("gate{}", i),
                    active: active.clone(),
                    peak: peak.clone(),
                }) as Arc<dyn BaseModel>
            })
            .collect();
        models.insert(1, Arc::new(Panicky));
        let ensemble = StackingEnsemble::new(config(parallel), models).unwrap();
        (ensemble, peak)
    }

    #[test]
    fn test_worker_pool_bounds_concurrency() {
        let (serial, peak) = gated(1, 4);
        let meta = serial.get_base_predictions(&frame(3));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(meta.degraded_models, vec!["panicky"]);

        let (pair, peak) = gated(2, 6);
        let meta = pair.get_base_predictions(&frame(3));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(meta.degraded_models, vec!["panicky"]);
        // column order follows registration, not completion
        assert_eq!(meta.outputs[0].model, "gate0");
        assert_eq!(meta.outputs[1].model, "panicky");
        assert_eq!(meta.rows[[2, 0]], 0.4);
    }

    #[test]
    fn test_bound_copies_share_workers() {
        let ensemble = StackingEnsemble::new(config(3), vec![Arc::new(FromColumn)]).unwrap();
        let (learner, _) = ensemble.train(&frame(20), &labels(20)).unwrap();
        let bound = ensemble.with_meta_learner(Arc::new(learner));
        assert!(Arc::ptr_eq(&ensemble.pool, &bound.pool));
        assert_eq!(bound.pool.current_num_threads(), 3);
    }
}
