//! Pipeline Telemetry
//!
//! Counts what the scoring path does, for monitoring and reports:
//! - assessments scored, by risk band
//! - degraded base-model events, by model
//! - rows that relied mostly on fallback data
//! - scoring latency
//!
//! No entity ids are stored, only aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::models::types::RiskAssessment;

/// Aggregated statistics for reporting
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineStats {
    pub total_assessed: u64,
    pub total_batches: u64,
    pub needs_review: u64,
    pub fallback_rows: u64,
    /// Base-model placeholder events (one per model per batch)
    pub degraded_events: u64,
    pub degraded_by_model: BTreeMap<String, u64>,
    pub assessments_by_band: BTreeMap<String, u64>,
    pub training_runs: u64,
    pub avg_latency_us: f64,
    pub period_start: u64,
    pub period_end: u64,
}

impl PipelineStats {
    pub fn summary(&self) -> String {
        let mut out = format!(
            r#"
╔══════════════════════════════════════════════╗
║        📈 RUSTER CREDIT - SCORING REPORT       ║
╠══════════════════════════════════════════════╣
║   🔍 Assessed:          {:>10}            ║
║   📦 Batches:           {:>10}            ║
║   👀 Needs review:      {:>10}            ║
║   🩹 Fallback rows:     {:>10}            ║
║   ⚠️ Degraded events:   {:>10}            ║
║   🧠 Training runs:     {:>10}            ║
║   ⚡ Avg latency:       {:>10.1}us          ║
╚══════════════════════════════════════════════╝
"#,
            self.total_assessed,
            self.total_batches,
            self.needs_review,
            self.fallback_rows,
            self.degraded_events,
            self.training_runs,
            self.avg_latency_us,
        );
        for (band, count) in &self.assessments_by_band {
            out.push_str(&format!("   {:<16} {}\n", band, count));
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.1}\n",
            self.period_start,
            self.period_end,
            self.total_assessed,
            self.needs_review,
            self.fallback_rows,
            self.degraded_events,
            self.avg_latency_us,
        )
    }
}

pub struct PipelineTelemetry {
    total_assessed: AtomicU64,
    total_batches: AtomicU64,
    needs_review: AtomicU64,
    fallback_rows: AtomicU64,
    degraded_events: AtomicU64,
    training_runs: AtomicU64,
    total_latency_us: AtomicU64,
    degraded_by_model: RwLock<HashMap<String, u64>>,
    band_counts: RwLock<HashMap<String, u64>>,
    session_start: u64,
}

impl PipelineTelemetry {
    pub fn new() -> Self {
        Self {
            total_assessed: AtomicU64::new(0),
            total_batches: AtomicU64::new(0),
            needs_review: AtomicU64::new(0),
            fallback_rows: AtomicU64::new(0),
            degraded_events: AtomicU64::new(0),
            training_runs: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            degraded_by_model: RwLock::new(HashMap::new()),
            band_counts: RwLock::new(HashMap::new()),
            session_start: current_timestamp(),
        }
    }

    /// Record one scored batch
    pub fn record_batch(&self, assessments: &[RiskAssessment], degraded_models: &[String], fallback_rows: u64, latency_us: u64) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_assessed.fetch_add(assessments.len() as u64, Ordering::Relaxed);
        self.fallback_rows.fetch_add(fallback_rows, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        let review = assessments.iter().filter(|a| a.needs_review).count() as u64;
        self.needs_review.fetch_add(review, Ordering::Relaxed);

        if let Ok(mut counts) = self.band_counts.write() {
            for a in assessments {
                *counts.entry(a.label.clone()).or_insert(0) += 1;
            }
        }

        if !degraded_models.is_empty() {
            self.degraded_events
                .fetch_add(degraded_models.len() as u64, Ordering::Relaxed);
            if let Ok(mut counts) = self.degraded_by_model.write() {
                for model in degraded_models {
                    *counts.entry(model.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn record_training(&self) {
        self.training_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> PipelineStats {
        let total_assessed = self.total_assessed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        let avg_latency_us = if total_assessed > 0 {
            total_latency as f64 / total_assessed as f64
        } else {
            0.0
        };

        let snapshot = |lock: &RwLock<HashMap<String, u64>>| -> BTreeMap<String, u64> {
            lock.read()
                .map(|counts| counts.iter().map(|(k, v)| (k.clone(), *v)).collect())
                .unwrap_or_default()
        };

        PipelineStats {
            total_assessed,
            total_batches: self.total_batches.load(Ordering::Relaxed),
            needs_review: self.needs_review.load(Ordering::Relaxed),
            fallback_rows: self.fallback_rows.load(Ordering::Relaxed),
            degraded_events: self.degraded_events.load(Ordering::Relaxed),
            degraded_by_model: snapshot(&self.degraded_by_model),
            assessments_by_band: snapshot(&self.band_counts),
            training_runs: self.training_runs.load(Ordering::Relaxed),
            avg_latency_us,
            period_start: self.session_start,
            period_end: current_timestamp(),
        }
    }

    /// Write current stats to `<dir>/stats_<ts>.json`
    pub fn export_stats_json(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(dir)?;
        let stats = self.get_stats();
        let path = dir.join(format!("stats_{}.json", current_timestamp()));
        fs::write(&path, stats.to_json())?;
        Ok(path)
    }

    /// Append current stats to `<dir>/telemetry_history.csv`
    pub fn export_stats_csv(&self, dir: &Path) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join("telemetry_history.csv");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(
                file,
                "period_start,period_end,total_assessed,needs_review,fallback_rows,degraded_events,avg_latency_us"
            )?;
        }
        write!(file, "{}", self.get_stats().to_csv_row())?;
        Ok(path)
    }

    /// Reset counters (new reporting period)
    pub fn reset(&self) {
        for counter in [
            &self.total_assessed,
            &self.total_batches,
            &self.needs_review,
            &self.fallback_rows,
            &self.degraded_events,
            &self.training_runs,
            &self.total_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut counts) = self.degraded_by_model.write() {
            counts.clear();
        }
        if let Ok(mut counts) = self.band_counts.write() {
            counts.clear();
        }
    }
}

impl Default for PipelineTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
