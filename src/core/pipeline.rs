//! Fitted feature pipeline and the clean `Frame` it produces
//!
//! The pipeline is immutable once fitted: imputation statistics, scaler
//! parameters and PCA components are frozen, so `transform` is pure and
//! repeated calls on the same input give identical frames.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::core::features::{FeatureLayout, PreparedBatch, PreparedRow};
use crate::models::config::{ImputeStrategy, ScalerKind};
use crate::models::errors::AppResult;
use crate::models::types::{FeatureContext, FeatureVector, RowProvenance};
use crate::utils::constants::{
    EMPTY_COLUMN_IMPUTE_VALUE, PCA_POWER_ITERATIONS, PCA_TOLERANCE, UNKNOWN_CATEGORY,
};

// ============================================
// FRAME
// ============================================

/// Clean tabular batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub entity_ids: Vec<String>,
    /// Numerical + derived column names, post scaling
    pub scaled_columns: Vec<String>,
    /// rows x scaled_columns
    pub scaled: Array2<f64>,
    /// Model-input column names (scaled columns, or `pc_1..k`)
    pub model_columns: Vec<String>,
    /// rows x model_columns
    pub matrix: Array2<f64>,
    /// Categorical values, passed through unscaled
    pub categorical: Vec<BTreeMap<String, String>>,
    /// Post-derivation values in natural units
    pub contexts: Vec<FeatureContext>,
    pub provenance: Vec<RowProvenance>,
    pub layout_version: String,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Scaled value of a named numeric column
    pub fn scaled_value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.scaled_columns.iter().position(|c| c == column)?;
        self.scaled.get((row, idx)).copied()
    }

    /// Named lookup over scaled columns first, then model columns (`pc_*`)
    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        self.scaled_value(row, column).or_else(|| {
            let idx = self.model_columns.iter().position(|c| c == column)?;
            self.matrix.get((row, idx)).copied()
        })
    }

    /// Restrict to a subset of rows (training splits)
    pub fn select(&self, rows: &[usize]) -> Frame {
        Frame {
            entity_ids: rows.iter().map(|&i| self.entity_ids[i].clone()).collect(),
            scaled_columns: self.scaled_columns.clone(),
            scaled: self.scaled.select(Axis(0), rows),
            model_columns: self.model_columns.clone(),
            matrix: self.matrix.select(Axis(0), rows),
            categorical: rows.iter().map(|&i| self.categorical[i].clone()).collect(),
            contexts: rows.iter().map(|&i| self.contexts[i].clone()).collect(),
            provenance: rows.iter().map(|&i| self.provenance[i].clone()).collect(),
            layout_version: self.layout_version.clone(),
        }
    }
}

// ============================================
// IMPUTER / SCALER
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imputer {
    pub strategy: ImputeStrategy,
    pub fill: Vec<f64>,
}

impl Imputer {
    fn fit(strategy: ImputeStrategy, prepared: &PreparedBatch, columns: &[String]) -> Self {
        let fill = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let observed = prepared.observed(idx);
                if observed.is_empty() {
                    warn!(
                        "⚠️ Column '{}' has no observed values, imputing {}",
                        name, EMPTY_COLUMN_IMPUTE_VALUE
                    );
                    return EMPTY_COLUMN_IMPUTE_VALUE;
                }
                match strategy {
                    ImputeStrategy::Mean => mean(&observed),
                    ImputeStrategy::Median => quantile(&observed, 0.5),
                    ImputeStrategy::MostFrequent => most_frequent(&observed),
                }
            })
            .collect();
        Self { strategy, fill }
    }
}

/// `(x - center) / scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScale {
    pub center: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub kind: ScalerKind,
    pub columns: Vec<ColumnScale>,
}

impl Scaler {
    fn fit(kind: ScalerKind, x: &Array2<f64>) -> Self {
        let columns = x
            .axis_iter(Axis(1))
            .map(|column| {
                let values = column.to_vec();
                let (center, spread) = match kind {
                    ScalerKind::Standard if values.is_empty() => (0.0, 1.0),
                    ScalerKind::Standard => (column.mean().unwrap_or(0.0), column.var(0.0).sqrt()),
                    ScalerKind::MinMax => {
                        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
                        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                        (lo, hi - lo)
                    }
                    ScalerKind::Robust => {
                        let q1 = quantile(&values, 0.25);
                        let q3 = quantile(&values, 0.75);
                        (quantile(&values, 0.5), q3 - q1)
                    }
                };
                // degenerate spread
                let scale = if spread.is_finite() && spread > f64::EPSILON { spread } else { 1.0 };
                ColumnScale { center, scale }
            })
            .collect();
        Self { kind, columns }
    }

    fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        let center: Array1<f64> = self.columns.iter().map(|c| c.center).collect();
        let scale: Array1<f64> = self.columns.iter().map(|c| c.scale).collect();
        (x - &center) / &scale
    }
}

// ============================================
// PCA REDUCER
// ============================================

/// Principal components by power iteration with deflation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaReducer {
    pub mean: Array1<f64>,
    /// k x d, one component per row
    pub components: Array2<f64>,
    pub explained_variance: Vec<f64>,
}

impl PcaReducer {
    fn fit(x: &Array2<f64>, k: usize) -> Self {
        let (n, d) = x.dim();
        let k = k.min(d);

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = x - &mean;
        let mut cov = centered.t().dot(&centered) / n.max(1) as f64;

        let mut components = Array2::zeros((k, d));
        let mut explained_variance = Vec::with_capacity(k);

        for c in 0..k {
            let mut v = Array1::from_shape_fn(d, |i| 1.0 + 0.1 * ((i + c) % d) as f64);
            let start = v.dot(&v).sqrt();
            v /= start;

            for _ in 0..PCA_POWER_ITERATIONS {
                let mut w = cov.dot(&v);
                let norm = w.dot(&w).sqrt();
                if norm < PCA_TOLERANCE {
                    break;
                }
                w /= norm;
                let delta = (&w - &v).mapv(f64::abs).sum();
                v = w;
                if delta < PCA_TOLERANCE {
                    break;
                }
            }

            // deterministic sign: largest component positive
            let pivot = v.iter().fold(0.0f64, |acc, &x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                v.mapv_inplace(|x| -x);
            }

            // deflate: cov -= lambda * v v^T
            let lambda = v.dot(&cov.dot(&v));
            let outer = v.view().insert_axis(Axis(1)).dot(&v.view().insert_axis(Axis(0)));
            cov.scaled_add(-lambda, &outer);

            debug!("📐 pc_{} explains variance {:.4}", c + 1, lambda);
            explained_variance.push(lambda);
            components.row_mut(c).assign(&v);
        }

        Self {
            mean,
            components,
            explained_variance,
        }
    }

    fn project(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean).dot(&self.components.t())
    }

    pub fn column_names(&self) -> Vec<String> {
        (1..=self.components.nrows()).map(|i| format!("pc_{}", i)).collect()
    }
}

// ============================================
// PIPELINE
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub layout: FeatureLayout,
    pub imputer: Imputer,
    pub scaler: Scaler,
    pub reducer: Option<PcaReducer>,
    /// Fill value per categorical column
    pub categorical_fill: BTreeMap<String, String>,
    /// Derived from the output columns
    pub layout_version: String,
    pub training_rows: usize,
    pub fitted_at: DateTime<Utc>,
}

impl Pipeline {
    pub(crate) fn fit(
        layout: FeatureLayout,
        prepared: &PreparedBatch,
        imputation: ImputeStrategy,
        scaler: ScalerKind,
        components: Option<usize>,
    ) -> Self {
        let columns = layout.numeric_columns();
        let imputer = Imputer::fit(imputation, prepared, &columns);

        let imputed = impute(&prepared.rows, &imputer);
        let scaler = Scaler::fit(scaler, &imputed);
        let scaled = scaler.apply(&imputed);
        let reducer = components.map(|k| PcaReducer::fit(&scaled, k));

        let categorical_fill = layout
            .categorical
            .iter()
            .map(|name| {
                let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                for row in &prepared.rows {
                    if let Some(Some(v)) = row.categorical.get(name) {
                        *counts.entry(v.as_str()).or_insert(0) += 1;
                    }
                }
                // ties resolve to the lexically smallest value
                let fill = counts
                    .iter()
                    .fold(None::<(&str, usize)>, |best, (v, n)| match best {
                        Some((_, bn)) if bn >= *n => best,
                        _ => Some((*v, *n)),
                    })
                    .map(|(v, _)| v.to_string())
                    .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
                (name.clone(), fill)
            })
            .collect();

        let model_columns = match &reducer {
            Some(r) => r.column_names(),
            None => columns.clone(),
        };
        let layout_version = layout_version(&model_columns);

        Self {
            layout,
            imputer,
            scaler,
            reducer,
            categorical_fill,
            layout_version,
            training_rows: prepared.rows.len(),
            fitted_at: Utc::now(),
        }
    }

    pub fn model_columns(&self) -> Vec<String> {
        match &self.reducer {
            Some(r) => r.column_names(),
            None => self.layout.numeric_columns(),
        }
    }

    /// Apply the frozen pipeline to a batch
    pub fn transform(&self, batch: &[FeatureVector]) -> AppResult<Frame> {
        self.layout.check_required(batch)?;
        let prepared = self.layout.prepare(batch);

        let scaled = self.scaler.apply(&impute(&prepared.rows, &self.imputer));
        let matrix = match &self.reducer {
            Some(r) => r.project(&scaled),
            None => scaled.clone(),
        };

        let mut frame = Frame {
            entity_ids: Vec::with_capacity(batch.len()),
            scaled_columns: self.layout.numeric_columns(),
            scaled,
            model_columns: self.model_columns(),
            matrix,
            categorical: Vec::with_capacity(batch.len()),
            contexts: Vec::with_capacity(batch.len()),
            provenance: Vec::with_capacity(batch.len()),
            layout_version: self.layout_version.clone(),
        };

        for row in prepared.rows {
            let categorical = row
                .categorical
                .into_iter()
                .map(|(name, value)| {
                    let value = value
                        .or_else(|| self.categorical_fill.get(&name).cloned())
                        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
                    (name, value)
                })
                .collect();

            frame.entity_ids.push(row.entity_id);
            frame.categorical.push(categorical);
            frame.contexts.push(row.context);
            frame.provenance.push(row.provenance);
        }

        Ok(frame)
    }
}

/// Numeric block with gaps filled, rows x columns
fn impute(rows: &[PreparedRow], imputer: &Imputer) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), imputer.fill.len()), |(r, c)| {
        rows[r].numeric.get(c).copied().flatten().unwrap_or(imputer.fill[c])
    })
}

/// FNV-1a over the column names
fn layout_version(columns: &[String]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in columns.join("|").bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("cols{}-{:016x}", columns.len(), hash)
}

// ============================================
// STATS HELPERS
// ============================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linear-interpolated quantile
fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Most frequent value; ties go to the smallest
fn most_frequent(values: &[f64]) -> f64 {
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for v in values {
        counts.entry(v.to_bits()).or_insert((*v, 0)).1 += 1;
    }
    counts
        .values()
        .fold(None::<(f64, usize)>, |best, &(v, n)| match best {
            Some((bv, bn)) if bn > n || (bn == n && bv <= v) => best,
            _ => Some((v, n)),
        })
        .map(|(v, _)| v)
        .unwrap_or(EMPTY_COLUMN_IMPUTE_VALUE)
}
