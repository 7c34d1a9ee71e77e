//! Shared fixtures for integration tests
#![allow(dead_code)]

use ruster_credit::core::base_model::{BaseModel, LinearModel, ScorecardModel};
use ruster_credit::core::pipeline::Frame;
use ruster_credit::models::errors::{AppError, AppResult};
use ruster_credit::utils::constants::*;
use ruster_credit::{EngineConfig, FeatureVector};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deterministic pseudo-jitter in [0, 1)
fn jitter(i: usize, salt: usize) -> f64 {
    ((i * 37 + salt * 11) % 100) as f64 / 100.0
}

/// Good borrowers (label 0) alternating with bad borrowers (label 1)
pub fn labeled_population(n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|i| {
            let row = FeatureVector::new(format!("entity-{:04}", i));
            if i % 2 == 0 {
                row.with(FEATURE_COLLATERAL_RATIO, 2.0 + jitter(i, 1))
                    .with(FEATURE_REPAYMENT_RATIO, 0.85 + 0.15 * jitter(i, 2))
                    .with(FEATURE_TRANSACTION_COUNT, (20.0 + 60.0 * jitter(i, 3)).round())
                    .with(FEATURE_IDENTITY_VERIFIED, true)
                    .with(FEATURE_WALLET_AGE_DAYS, 200.0 + 300.0 * jitter(i, 4))
                    .with(FEATURE_CHAIN, "ethereum")
                    .with(TARGET_DEFAULTED, 0.0)
            } else {
                row.with(FEATURE_COLLATERAL_RATIO, 1.0 + 0.3 * jitter(i, 1))
                    .with(FEATURE_REPAYMENT_RATIO, 0.2 + 0.3 * jitter(i, 2))
                    .with(FEATURE_TRANSACTION_COUNT, (5.0 * jitter(i, 3)).round())
                    .with(FEATURE_IDENTITY_VERIFIED, false)
                    .with(FEATURE_WALLET_AGE_DAYS, 5.0 + 40.0 * jitter(i, 4))
                    .with_fallback(FEATURE_CHAIN, "polygon")
                    .with(TARGET_DEFAULTED, 1.0)
            }
        })
        .collect()
}

pub fn config(dir: &Path) -> EngineConfig {
    EngineConfig {
        artifact_dir: dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

/// Strong borrower
pub fn scenario_a() -> FeatureVector {
    FeatureVector::new("scenario-a")
        .with(FEATURE_COLLATERAL_RATIO, 2.5)
        .with(FEATURE_REPAYMENT_RATIO, 0.95)
        .with(FEATURE_TRANSACTION_COUNT, 50.0)
        .with(FEATURE_IDENTITY_VERIFIED, true)
}

/// Weak borrower
pub fn scenario_b() -> FeatureVector {
    FeatureVector::new("scenario-b")
        .with(FEATURE_COLLATERAL_RATIO, 1.1)
        .with(FEATURE_REPAYMENT_RATIO, 0.4)
        .with(FEATURE_TRANSACTION_COUNT, 2.0)
}

/// Wraps a model and fails on demand
pub struct Switchable {
    inner: Arc<dyn BaseModel>,
    failing: Arc<AtomicBool>,
}

impl BaseModel for Switchable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn score(&self, frame: &Frame) -> AppResult<Vec<f64>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::base_model_failed(self.inner.name(), "switched off"));
        }
        self.inner.score(frame)
    }
}

/// Wrap one model behind its own failure switch
pub fn switchable(inner: Arc<dyn BaseModel>) -> (Arc<dyn BaseModel>, Arc<AtomicBool>) {
    let failing = Arc::new(AtomicBool::new(false));
    let model = Arc::new(Switchable {
        inner,
        failing: failing.clone(),
    });
    (model, failing)
}

/// Write a JSON engine config next to the artifacts and return its path
pub fn write_config(dir: &Path, config: &serde_json::Value) -> PathBuf {
    let path = dir.join("engine.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}

/// The lending models behind one shared failure switch
pub fn switchable_lending_models() -> (Vec<Arc<dyn BaseModel>>, Arc<AtomicBool>) {
    let failing = Arc::new(AtomicBool::new(false));
    let models: Vec<Arc<dyn BaseModel>> = vec![
        Arc::new(Switchable {
            inner: Arc::new(ScorecardModel::lending()),
            failing: failing.clone(),
        }),
        Arc::new(Switchable {
            inner: Arc::new(LinearModel::lending()),
            failing: failing.clone(),
        }),
    ];
    (models, failing)
}
