//! Risk Engine
//! Orchestrates the entire scoring pipeline
//!
//! raw entity → FeatureProcessor → StackingEnsemble (base models + meta-learner)
//! → UncertaintyEstimator → RiskClassifier → RecommendationEngine → RiskReport
//!
//! Scoring always runs against an `Arc` snapshot of the active model bundle,
//! so a concurrent training cycle or reload never changes a batch mid-flight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};

use crate::core::base_model::{BaseModel, LinearModel, ScorecardModel};
use crate::core::classifier::RiskClassifier;
use crate::core::ensemble::{EnsembleTrainingReport, StackingEnsemble};
use crate::core::features::FeatureProcessor;
use crate::core::recommendation::RecommendationEngine;
use crate::core::uncertainty::UncertaintyEstimator;
use crate::models::config::EngineConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{FeatureVector, RiskAssessment, RiskReport};
use crate::utils::registry::ModelRegistry;
use crate::utils::store::{ArtifactStore, ModelBundle, PublishRequest};
use crate::utils::telemetry::PipelineTelemetry;

/// Component name of the meta-learner's own score
pub const META_COMPONENT: &str = "meta";

/// Outcome of one training cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub version: String,
    pub training_rows: usize,
    pub pipeline_layout: String,
    pub meta_layout: String,
    pub meta_learner: String,
    pub ensemble: EnsembleTrainingReport,
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn summary(&self) -> String {
        let m = &self.ensemble.metrics;
        let mut out = format!(
            "\n🧠 Trained {} on {} rows ({} meta-learner)\n   acc={:.3} prec={:.3} rec={:.3} f1={:.3} ({} eval rows{})\n",
            self.version,
            self.training_rows,
            self.meta_learner,
            m.accuracy,
            m.precision,
            m.recall,
            m.f1,
            m.support,
            if self.ensemble.evaluated_on_training { ", training set" } else { "" }
        );
        for (column, weight) in &self.ensemble.meta_importance {
            out.push_str(&format!("     - {}: {:+.4}\n", column, weight));
        }
        if !self.ensemble.degraded_models.is_empty() {
            out.push_str(&format!("   Degraded during training: {}\n", self.ensemble.degraded_models.join(", ")));
        }
        out
    }
}

pub struct RiskEngine {
    config: EngineConfig,
    processor: FeatureProcessor,
    ensemble: StackingEnsemble,
    uncertainty: UncertaintyEstimator,
    classifier: RiskClassifier,
    recommender: RecommendationEngine,
    registry: ModelRegistry,
    telemetry: Arc<PipelineTelemetry>,
}

impl RiskEngine {
    /// Validate the config, wire every component and load the latest
    /// published model (if any).
    pub fn new(config: EngineConfig, base_models: Vec<Arc<dyn BaseModel>>) -> AppResult<Self> {
        config.validate()?;

        let processor = FeatureProcessor::new(config.feature_config.clone())?;
        let ensemble = StackingEnsemble::new(config.ensemble_config.clone(), base_models)?;
        let uncertainty = UncertaintyEstimator::new(config.uncertainty.clone(), config.ensemble_config.use_uncertainty);
        let classifier = RiskClassifier::from_specs(&config.risk_bands)?;
        let recommender = RecommendationEngine::new(config.recommendation_rules.clone())?;
        let registry = ModelRegistry::new(ArtifactStore::new(config.artifact_dir.clone()));
        registry.init()?;

        info!(
            "✅ Risk engine ready: {} base model(s), {} band(s), {} rule(s)",
            ensemble.model_names().len(),
            classifier.band_count(),
            recommender.rules().len()
        );

        Ok(Self {
            config,
            processor,
            ensemble,
            uncertainty,
            classifier,
            recommender,
            registry,
            telemetry: Arc::new(PipelineTelemetry::new()),
        })
    }

    /// Engine with the built-in scorecard and linear base models
    pub fn with_lending_models(config: EngineConfig) -> AppResult<Self> {
        let models: Vec<Arc<dyn BaseModel>> = vec![Arc::new(ScorecardModel::lending()), Arc::new(LinearModel::lending())];
        Self::new(config, models)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ensemble(&self) -> &StackingEnsemble {
        &self.ensemble
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &Arc<PipelineTelemetry> {
        &self.telemetry
    }

    pub fn active_version(&self) -> Option<String> {
        self.registry.active_version()
    }

    /// Pick up a version published by another process
    pub fn reload(&self) -> AppResult<Option<String>> {
        self.registry.reload()
    }

    pub fn teardown(&self) {
        self.registry.teardown();
    }

    // ============================================
    // SCORING
    // ============================================

    /// Score one entity
    pub fn assess(&self, entity: &FeatureVector) -> AppResult<RiskReport> {
        let bundle = self.registry.require_active()?;
        self.assess_with(&bundle, std::slice::from_ref(entity))?
            .pop()
            .ok_or_else(|| AppError::new(ErrorCode::Unknown, "scoring produced no report"))
    }

    /// Score a batch against one model snapshot
    pub fn assess_batch(&self, batch: &[FeatureVector]) -> AppResult<Vec<RiskReport>> {
        let bundle = self.registry.require_active()?;
        self.assess_with(&bundle, batch)
    }

    fn assess_with(&self, bundle: &ModelBundle, batch: &[FeatureVector]) -> AppResult<Vec<RiskReport>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let frame = self.processor.transform(&bundle.pipeline, batch)?;
        let ensemble = self.ensemble.with_meta_learner(bundle.meta_learner.clone());
        let prediction = ensemble.predict_detailed(&frame)?;
        let uncertainty = self
            .uncertainty
            .estimate(&frame, &prediction.meta, prediction.margins.as_deref());

        let mut reports = Vec::with_capacity(frame.len());
        for (row, probability) in prediction.probabilities.iter().enumerate() {
            let mut component_scores = BTreeMap::new();
            for output in prediction.meta.outputs.iter().filter(|o| !o.degraded) {
                component_scores.insert(output.model.clone(), output.scores[row] * 100.0);
            }
            component_scores.insert(META_COMPONENT.to_string(), RiskAssessment::score_from_probability(*probability));

            let band = self
                .classifier
                .classify(RiskAssessment::score_from_probability(*probability));
            let assessment = RiskAssessment::new(
                &frame.entity_ids[row],
                *probability,
                uncertainty[row],
                &band.label,
                band.rank,
                component_scores,
                prediction.meta.degraded_models.clone(),
                bundle.version(),
            );
            let recommendations = self.recommender.recommend(&assessment, &frame.contexts[row]);
            debug!(
                "🎯 {} → {:.1} ({}) u={:.2}, {} recommendation(s)",
                assessment.entity_id,
                assessment.score,
                assessment.label,
                assessment.uncertainty,
                recommendations.len()
            );
            reports.push(RiskReport {
                assessment,
                recommendations,
            });
        }

        let fallback_rows = frame
            .provenance
            .iter()
            .filter(|p| p.is_fallback(self.config.uncertainty.fallback_fraction_threshold))
            .count() as u64;
        let assessments: Vec<RiskAssessment> = reports.iter().map(|r| r.assessment.clone()).collect();
        self.telemetry.record_batch(
            &assessments,
            &prediction.meta.degraded_models,
            fallback_rows,
            start.elapsed().as_micros() as u64,
        );

        Ok(reports)
    }

    /// Score many entities with at most `max_concurrent_assessments` blocking
    /// tasks in flight. Results keep input order; each entity fails or
    /// succeeds on its own.
    pub async fn assess_population(self: Arc<Self>, entities: Vec<FeatureVector>) -> AppResult<Vec<AppResult<RiskReport>>> {
        let bundle = self.registry.require_active()?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_assessments.max(1)));

        info!(
            "🚀 Scoring population of {} against {} ({} workers)",
            entities.len(),
            bundle.version(),
            self.config.max_concurrent_assessments
        );

        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::new(ErrorCode::Unknown, format!("worker pool closed: {}", e)))?;
            let engine = self.clone();
            let bundle = bundle.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine
                    .assess_with(&bundle, std::slice::from_ref(&entity))?
                    .pop()
                    .ok_or_else(|| AppError::new(ErrorCode::Unknown, "scoring produced no report"))
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("⚠️ Assessment task failed: {}", e);
                    Err(AppError::new(ErrorCode::Unknown, format!("assessment task failed: {}", e)))
                }
            });
        }
        Ok(results)
    }

    // ============================================
    // TRAINING
    // ============================================

    fn labels(&self, labeled: &[FeatureVector]) -> AppResult<Vec<f64>> {
        let target = &self.config.feature_config.target_feature;
        labeled
            .iter()
            .map(|row| {
                row.number(target).ok_or_else(|| {
                    AppError::invalid_training_data(format!("row '{}' has no '{}' label", row.entity_id, target))
                })
            })
            .collect()
    }

    /// Fit the pipeline, train a new meta-learner, publish it as the next
    /// version and make it active. Only one cycle may run at a time.
    pub fn train(&self, labeled: &[FeatureVector]) -> AppResult<TrainingReport> {
        let guard = self.registry.begin_training()?;
        info!("🧠 Training cycle started on {} rows", labeled.len());

        let labels = self.labels(labeled)?;
        let pipeline = self.processor.fit(labeled)?;
        let frame = self.processor.transform(&pipeline, labeled)?;
        let (learner, report) = self.ensemble.train(&frame, &labels)?;

        let base_model_artifacts = self
            .ensemble
            .model_names()
            .iter()
            .filter_map(|name| {
                self.ensemble
                    .base_model(name)
                    .and_then(|m| m.artifact())
                    .map(|artifact| (name.clone(), artifact))
            })
            .collect();

        let bundle = self.registry.publish(
            &guard,
            PublishRequest {
                pipeline: &pipeline,
                meta_learner: &learner,
                base_models: self.ensemble.model_names().to_vec(),
                base_model_artifacts,
                metrics: report.metrics.clone(),
            },
        )?;
        self.telemetry.record_training();

        let training = TrainingReport {
            version: bundle.version().to_string(),
            training_rows: labeled.len(),
            pipeline_layout: bundle.manifest.pipeline_layout.clone(),
            meta_layout: bundle.manifest.meta_layout.clone(),
            meta_learner: bundle.manifest.meta_learner.clone(),
            ensemble: report,
            trained_at: bundle.manifest.created_at,
        };
        info!("✅ Training cycle finished: {} active", training.version);
        Ok(training)
    }

    /// `train` on a blocking worker
    pub async fn train_async(self: Arc<Self>, labeled: Vec<FeatureVector>) -> AppResult<TrainingReport> {
        tokio::task::spawn_blocking(move || self.train(&labeled))
            .await
            .map_err(|e| AppError::new(ErrorCode::Unknown, format!("training task failed: {}", e)))?
    }

    /// Write telemetry stats next to the artifacts
    pub fn export_telemetry(&self) -> AppResult<PathBuf> {
        let dir = self.config.artifact_dir.join("telemetry");
        Ok(self.telemetry.export_stats_json(&dir)?)
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("ensemble", &self.ensemble)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::*;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            artifact_dir: dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    fn labeled(n: usize) -> Vec<FeatureVector> {
        (0..n)
            .map(|i| {
                let good = i % 2 == 0;
                let jitter = (i % 7) as f64 / 7.0;
                FeatureVector::new(format!("e{}", i))
                    .with(FEATURE_COLLATERAL_RATIO, if good { 2.0 + jitter } else { 1.0 + jitter * 0.3 })
                    .with(FEATURE_REPAYMENT_RATIO, if good { 0.9 + jitter * 0.1 } else { 0.2 + jitter * 0.3 })
                    .with(FEATURE_TRANSACTION_COUNT, if good { 40.0 } else { 2.0 })
                    .with(FEATURE_IDENTITY_VERIFIED, good)
                    .with(TARGET_DEFAULTED, if good { 0.0 } else { 1.0 })
            })
            .collect()
    }

    #[test]
    fn test_not_ready_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RiskEngine::with_lending_models(config(dir.path())).unwrap();
        let err = engine.assess(&FeatureVector::new("x").with(FEATURE_COLLATERAL_RATIO, 2.0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotReady);
    }

    #[test]
    fn test_missing_label_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RiskEngine::with_lending_models(config(dir.path())).unwrap();
        let mut rows = labeled(20);
        rows[3].features.remove(TARGET_DEFAULTED);
        assert_eq!(engine.train(&rows).unwrap_err().code, ErrorCode::InvalidTrainingData);
        assert!(engine.registry().versions().unwrap().is_empty());
    }

    #[test]
    fn test_train_then_assess() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RiskEngine::with_lending_models(config(dir.path())).unwrap();
        let report = engine.train(&labeled(60)).unwrap();
        assert_eq!(report.version, "v0001");
        assert_eq!(engine.active_version().as_deref(), Some("v0001"));

        let out = engine.assess(&labeled(1)[0]).unwrap();
        assert!((0.0..=100.0).contains(&out.assessment.score));
        assert!(out.assessment.component_scores.contains_key(META_COMPONENT));
        assert!(out.assessment.component_scores.contains_key("scorecard"));
        assert!(!out.recommendations.is_empty());
        assert_eq!(engine.telemetry().get_stats().total_assessed, 1);
    }

    #[test]
    fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RiskEngine::with_lending_models(config(dir.path())).unwrap();
        engine.train(&labeled(40)).unwrap();
        assert!(engine.assess_batch(&[]).unwrap().is_empty());
    }
}
