//! Meta-learners
//!
//! Second stage of the stacking ensemble. Trained on the meta-feature matrix
//! (base model probabilities + passthrough features) and frozen afterwards:
//! retraining always produces a new `MetaLearner` value.
//!
//! - `logistic_regression`: batch gradient descent with L2, exposes a
//!   decision function (log-odds margin)
//! - `tree_ensemble`: bagged gini trees with Laplace-smoothed leaves, no margin

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::base_model::sigmoid;
use crate::models::config::{MetaLearnerKind, MetaLearnerSpec};
use crate::models::errors::{AppError, AppResult};

// ============================================
// HYPERPARAMETERS
// ============================================

fn hp_f64(map: &Map<String, Value>, key: &str, default: f64) -> AppResult<f64> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .filter(|x| x.is_finite())
            .ok_or_else(|| AppError::invalid_config(format!("meta_learner.hyperparameters.{} must be a number", key))),
    }
}

fn hp_u64(map: &Map<String, Value>, key: &str, default: u64) -> AppResult<u64> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v.as_u64().ok_or_else(|| {
            AppError::invalid_config(format!("meta_learner.hyperparameters.{} must be a non-negative integer", key))
        }),
    }
}

fn hp_usize(map: &Map<String, Value>, key: &str, default: usize) -> AppResult<usize> {
    let value = hp_u64(map, key, default as u64)?;
    usize::try_from(value)
        .map_err(|_| AppError::invalid_config(format!("meta_learner.hyperparameters.{} is out of range", key)))
}

fn hp_bool(map: &Map<String, Value>, key: &str, default: bool) -> AppResult<bool> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| AppError::invalid_config(format!("meta_learner.hyperparameters.{} must be a boolean", key))),
    }
}

fn warn_unknown(map: &Map<String, Value>, known: &[&str]) {
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            warn!("⚠️ Ignoring unknown meta-learner hyperparameter '{}'", key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2: f64,
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iter: 1000,
            l2: 0.0,
            tolerance: 1e-9,
        }
    }
}

impl LogisticParams {
    pub fn from_hyperparameters(map: &Map<String, Value>) -> AppResult<Self> {
        warn_unknown(map, &["learning_rate", "max_iter", "l2", "tolerance"]);
        let d = Self::default();
        let params = Self {
            learning_rate: hp_f64(map, "learning_rate", d.learning_rate)?,
            max_iter: hp_usize(map, "max_iter", d.max_iter)?,
            l2: hp_f64(map, "l2", d.l2)?,
            tolerance: hp_f64(map, "tolerance", d.tolerance)?,
        };
        if params.learning_rate <= 0.0 || params.max_iter == 0 || params.l2 < 0.0 {
            return Err(AppError::invalid_config(
                "logistic_regression needs learning_rate > 0, max_iter > 0, l2 >= 0",
            ));
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl TreeParams {
    pub fn from_hyperparameters(map: &Map<String, Value>, seed: u64) -> AppResult<Self> {
        warn_unknown(
            map,
            &["n_trees", "max_depth", "min_samples_split", "min_samples_leaf", "bootstrap", "seed"],
        );
        let params = Self {
            n_trees: hp_usize(map, "n_trees", 25)?,
            max_depth: hp_usize(map, "max_depth", 4)?,
            min_samples_split: hp_usize(map, "min_samples_split", 4)?,
            min_samples_leaf: hp_usize(map, "min_samples_leaf", 1)?,
            bootstrap: hp_bool(map, "bootstrap", true)?,
            seed: hp_u64(map, "seed", seed)?,
        };
        if params.n_trees == 0 || params.min_samples_leaf == 0 {
            return Err(AppError::invalid_config("tree_ensemble needs n_trees > 0 and min_samples_leaf > 0"));
        }
        Ok(params)
    }
}

// ============================================
// LOGISTIC REGRESSION
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticMeta {
    pub params: LogisticParams,
    pub coefficients: Array1<f64>,
    pub intercept: f64,
    pub iterations: usize,
}

impl LogisticMeta {
    fn fit(params: LogisticParams, x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        let mut last_cost = f64::INFINITY;
        let mut iterations = 0;

        for iter in 0..params.max_iter {
            iterations = iter + 1;
            let p = (x.dot(&weights) + bias).mapv(sigmoid);
            let err = &p - y;

            let cost = p
                .iter()
                .zip(y.iter())
                .map(|(&p, &t)| {
                    let pc = p.clamp(1e-15, 1.0 - 1e-15);
                    -(t * pc.ln() + (1.0 - t) * (1.0 - pc).ln())
                })
                .sum::<f64>()
                / n;

            let dw = x.t().dot(&err) / n + &weights * params.l2;
            weights.scaled_add(-params.learning_rate, &dw);
            bias -= params.learning_rate * err.sum() / n;

            if (last_cost - cost).abs() < params.tolerance {
                debug!("Logistic meta-learner converged at iteration {}", iter);
                break;
            }
            last_cost = cost;
        }

        Self {
            params,
            coefficients: weights,
            intercept: bias,
            iterations,
        }
    }

    fn margins(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }
}

// ============================================
// TREE ENSEMBLE
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        positives: f64,
        total: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    /// Laplace-smoothed leaf probability
    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            TreeNode::Leaf { positives, total } => (positives + 1.0) / (total + 2.0),
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let v = row.get(*feature).copied().unwrap_or(0.0);
                if v <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

fn gini(positives: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = positives / total;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    params: &'a TreeParams,
    importance: Array1<f64>,
    total_rows: f64,
}

impl TreeBuilder<'_> {
    fn build(&mut self, idx: &[usize], depth: usize) -> TreeNode {
        let total = idx.len() as f64;
        let positives: f64 = idx.iter().map(|&i| self.y[i]).sum();
        let leaf = TreeNode::Leaf { positives, total };

        if depth >= self.params.max_depth
            || idx.len() < self.params.min_samples_split
            || positives == 0.0
            || positives == total
        {
            return leaf;
        }

        let parent = total * gini(positives, total);
        let width = self.x.ncols();
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in 0..width {
            let mut sorted: Vec<usize> = idx.to_vec();
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_pos = 0.0;
            for split in 1..sorted.len() {
                left_pos += self.y[sorted[split - 1]];
                let lo = self.x[[sorted[split - 1], feature]];
                let hi = self.x[[sorted[split], feature]];
                if lo == hi || split < self.params.min_samples_leaf || sorted.len() - split < self.params.min_samples_leaf {
                    continue;
                }
                let nl = split as f64;
                let nr = total - nl;
                let child = nl * gini(left_pos, nl) + nr * gini(positives - left_pos, nr);
                let gain = parent - child;
                if best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                    best = Some((feature, (lo + hi) / 2.0, gain));
                }
            }
        }

        match best {
            Some((feature, threshold, gain)) if gain > 1e-12 => {
                self.importance[feature] += gain / self.total_rows;
                let (left, right): (Vec<usize>, Vec<usize>) =
                    idx.iter().copied().partition(|&i| self.x[[i, feature]] <= threshold);
                TreeNode::Split {
                    feature,
                    threshold,
                    left: Box::new(self.build(&left, depth + 1)),
                    right: Box::new(self.build(&right, depth + 1)),
                }
            }
            _ => leaf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsembleMeta {
    pub params: TreeParams,
    pub trees: Vec<TreeNode>,
    /// Normalized impurity decrease per meta column
    pub importances: Array1<f64>,
}

impl TreeEnsembleMeta {
    fn fit(params: TreeParams, x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let (n, width) = x.dim();
        let mut importances = Array1::<f64>::zeros(width);
        let mut trees = Vec::with_capacity(params.n_trees);

        for t in 0..params.n_trees {
            let idx: Vec<usize> = if params.bootstrap {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let mut builder = TreeBuilder {
                x,
                y,
                params: &params,
                importance: Array1::zeros(width),
                total_rows: n as f64,
            };
            trees.push(builder.build(&idx, 0));
            importances += &builder.importance;
        }

        let sum = importances.sum();
        if sum > 0.0 {
            importances /= sum;
        }

        Self {
            params,
            trees,
            importances,
        }
    }

    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        self.trees.iter().map(|t| t.predict(row.view())).sum::<f64>() / self.trees.len() as f64
    }
}

// ============================================
// FITTED META-LEARNER
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetaModel {
    LogisticRegression(LogisticMeta),
    TreeEnsemble(TreeEnsembleMeta),
}

/// Immutable fitted meta-learner bound to one meta-feature layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaLearner {
    /// Meta layout this learner was trained on
    pub layout: String,
    pub columns: Vec<String>,
    pub model: MetaModel,
    pub training_rows: usize,
    pub trained_at: DateTime<Utc>,
}

impl MetaLearner {
    /// Fit the learner selected by `spec.kind`
    pub fn fit(
        spec: &MetaLearnerSpec,
        seed: u64,
        layout: &str,
        columns: Vec<String>,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> AppResult<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(AppError::invalid_training_data(format!(
                "meta-learner needs matching non-empty rows/labels ({} vs {})",
                x.nrows(),
                y.len()
            )));
        }
        if x.ncols() != columns.len() {
            return Err(AppError::invalid_training_data("meta-feature rows do not match the column layout"));
        }

        let model = match spec.kind {
            MetaLearnerKind::LogisticRegression => {
                let params = LogisticParams::from_hyperparameters(&spec.hyperparameters)?;
                MetaModel::LogisticRegression(LogisticMeta::fit(params, x, y))
            }
            MetaLearnerKind::TreeEnsemble => {
                let params = TreeParams::from_hyperparameters(&spec.hyperparameters, seed)?;
                MetaModel::TreeEnsemble(TreeEnsembleMeta::fit(params, x, y))
            }
        };

        let learner = Self {
            layout: layout.to_string(),
            columns,
            model,
            training_rows: x.nrows(),
            trained_at: Utc::now(),
        };
        info!(
            "🧠 Trained {} meta-learner on {} rows x {} columns",
            learner.kind_name(),
            x.nrows(),
            learner.columns.len()
        );
        Ok(learner)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.model {
            MetaModel::LogisticRegression(_) => "logistic_regression",
            MetaModel::TreeEnsemble(_) => "tree_ensemble",
        }
    }

    fn check_width(&self, x: &Array2<f64>) -> AppResult<()> {
        if x.ncols() != self.columns.len() {
            return Err(AppError::model_not_ready(format!(
                "meta-feature matrix has {} columns, learner expects {}",
                x.ncols(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    /// Probabilities in `[0, 1]`
    pub fn predict_proba(&self, x: &Array2<f64>) -> AppResult<Vec<f64>> {
        self.check_width(x)?;
        let raw: Array1<f64> = match &self.model {
            MetaModel::LogisticRegression(m) => m.margins(x).mapv(sigmoid),
            MetaModel::TreeEnsemble(m) => x.rows().into_iter().map(|row| m.predict(row)).collect(),
        };
        Ok(raw
            .iter()
            .map(|&p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.5 })
            .collect())
    }

    /// Log-odds margin; `None` when the learner has no decision function
    pub fn decision_function(&self, x: &Array2<f64>) -> AppResult<Option<Vec<f64>>> {
        self.check_width(x)?;
        Ok(match &self.model {
            MetaModel::LogisticRegression(m) => Some(m.margins(x).to_vec()),
            MetaModel::TreeEnsemble(_) => None,
        })
    }

    /// Coefficients (logistic) or impurity importance (trees) per meta column
    pub fn importance(&self) -> BTreeMap<String, f64> {
        let values = match &self.model {
            MetaModel::LogisticRegression(m) => &m.coefficients,
            MetaModel::TreeEnsemble(m) => &m.importances,
        };
        self.columns.iter().cloned().zip(values.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::ErrorCode;
    use ndarray::array;
    use serde_json::json;

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 / 40.0 } else { 0.5 });
        let y = x.column(0).mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
        (x, y)
    }

    fn spec(kind: MetaLearnerKind, hp: Value) -> MetaLearnerSpec {
        MetaLearnerSpec {
            kind,
            hyperparameters: hp.as_object().cloned().unwrap_or_default(),
        }
    }

    fn columns() -> Vec<String> {
        vec!["bm:a".to_string(), "pt:b".to_string()]
    }

    #[test]
    fn test_logistic_learns_direction() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::LogisticRegression, json!({"learning_rate": 1.0, "max_iter": 3000}));
        let learner = MetaLearner::fit(&s, 42, "meta", columns(), &x, &y).unwrap();
        let p = learner.predict_proba(&array![[0.05, 0.5], [0.95, 0.5]]).unwrap();
        assert!(p[0] < 0.3 && p[1] > 0.7);
        assert!(learner.importance()["bm:a"] > 0.0);
        let margins = learner.decision_function(&array![[0.95, 0.5]]).unwrap().unwrap();
        assert!(margins[0] > 0.0);
    }

    #[test]
    fn test_tree_ensemble_laplace_and_no_margin() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::TreeEnsemble, json!({"n_trees": 5, "max_depth": 3}));
        let learner = MetaLearner::fit(&s, 7, "meta", columns(), &x, &y).unwrap();
        let p = learner.predict_proba(&array![[0.0, 0.5], [1.0, 0.5]]).unwrap();
        // smoothed leaves never reach 0 or 1
        assert!(p[0] > 0.0 && p[0] < 0.2);
        assert!(p[1] < 1.0 && p[1] > 0.8);
        assert!(learner.decision_function(&x).unwrap().is_none());
        let imp = learner.importance();
        assert!(imp["bm:a"] > imp["pt:b"]);
    }

    #[test]
    fn test_tree_ensemble_deterministic_for_seed() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::TreeEnsemble, json!({"n_trees": 3}));
        let a = MetaLearner::fit(&s, 11, "meta", columns(), &x, &y).unwrap();
        let b = MetaLearner::fit(&s, 11, "meta", columns(), &x, &y).unwrap();
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_bad_hyperparameter() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::LogisticRegression, json!({"learning_rate": "fast"}));
        assert!(MetaLearner::fit(&s, 42, "meta", columns(), &x, &y).is_err());
    }

    #[test]
    fn test_serde_tagged() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::LogisticRegression, json!({}));
        let learner = MetaLearner::fit(&s, 42, "meta", columns(), &x, &y).unwrap();
        let v = serde_json::to_value(&learner).unwrap();
        assert_eq!(v["model"]["type"], "logistic_regression");
    }

    #[test]
    fn test_seed_keeps_full_u64_range() {
        let big = json!({"seed": u64::MAX});
        let params = TreeParams::from_hyperparameters(big.as_object().unwrap(), 1).unwrap();
        assert_eq!(params.seed, u64::MAX);

        let inherited = TreeParams::from_hyperparameters(&Map::new(), u64::MAX - 3).unwrap();
        assert_eq!(inherited.seed, u64::MAX - 3);

        let negative = json!({"seed": -1});
        assert!(TreeParams::from_hyperparameters(negative.as_object().unwrap(), 1).is_err());
    }

    #[test]
    fn test_large_seed_trains_deterministically() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::TreeEnsemble, json!({"n_trees": 4, "seed": u64::MAX}));
        let a = MetaLearner::fit(&s, 0, "meta", columns(), &x, &y).unwrap();
        let b = MetaLearner::fit(&s, 0, "meta", columns(), &x, &y).unwrap();
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let (x, y) = separable();
        let s = spec(MetaLearnerKind::LogisticRegression, json!({}));
        let learner = MetaLearner::fit(&s, 42, "meta", columns(), &x, &y).unwrap();
        let err = learner.predict_proba(&array![[0.5]]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotReady);
        assert!(MetaLearner::fit(&s, 42, "meta", vec!["only".into()], &x, &y).is_err());
    }
}
