//! Versioned Artifact Store
//!
//! Layout:
//! ```text
//! artifact_dir/
//!   v0001/
//!     manifest.json
//!     pipeline.json
//!     meta_learner.json
//!     base_models/<name>.json
//!   v0002/ ...
//! ```
//! A version is written into a hidden temp directory and renamed into place,
//! so readers never observe a half-written version. "Latest" is the highest
//! numeric version, ties broken lexically.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::ensemble::ClassificationMetrics;
use crate::core::meta_learner::MetaLearner;
use crate::core::pipeline::Pipeline;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::APP_VERSION;

const MANIFEST_FILE: &str = "manifest.json";
const PIPELINE_FILE: &str = "pipeline.json";
const META_LEARNER_FILE: &str = "meta_learner.json";
const BASE_MODELS_DIR: &str = "base_models";
const TEMP_PREFIX: &str = ".tmp-";

/// Describes one published version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub app_version: String,
    pub pipeline_layout: String,
    pub meta_layout: String,
    pub meta_learner: String,
    pub base_models: Vec<String>,
    pub training_rows: usize,
    #[serde(default)]
    pub metrics: ClassificationMetrics,
    #[serde(default)]
    pub meta_importance: BTreeMap<String, f64>,
}

/// Everything the scoring path needs from one version
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub manifest: ArtifactManifest,
    pub pipeline: Arc<Pipeline>,
    pub meta_learner: Arc<MetaLearner>,
}

impl ModelBundle {
    pub fn version(&self) -> &str {
        &self.manifest.version
    }
}

/// Input of `ArtifactStore::publish`
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub pipeline: &'a Pipeline,
    pub meta_learner: &'a MetaLearner,
    pub base_models: Vec<String>,
    pub base_model_artifacts: Vec<(String, serde_json::Value)>,
    pub metrics: ClassificationMetrics,
}

/// Parse `vNNNN` into its number
pub fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix('v').and_then(|n| n.parse::<u64>().ok())
}

pub fn format_version(n: u64) -> String {
    format!("v{:04}", n)
}

fn persistence(context: String, err: impl std::error::Error + Send + Sync + 'static) -> AppError {
    AppError::with_source(ErrorCode::PersistenceFailure, context, err)
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published versions, oldest first. A `vNNNN` directory without a
    /// manifest is an interrupted or foreign write and is skipped.
    pub fn list_versions(&self) -> AppResult<Vec<String>> {
        Ok(self
            .scan_versions()?
            .into_iter()
            .filter(|(_, name)| {
                let complete = self.root.join(name).join(MANIFEST_FILE).exists();
                if !complete {
                    warn!("⚠️ Skipping {}: no {}", name, MANIFEST_FILE);
                }
                complete
            })
            .map(|(_, name)| name)
            .collect())
    }

    /// Every `vNNNN` directory, complete or not, in numeric order
    fn scan_versions(&self) -> AppResult<Vec<(u64, String)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .map_err(|e| persistence(format!("cannot list {}", self.root.display()), e))?;

        let mut versions: Vec<(u64, String)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| persistence(format!("cannot list {}", self.root.display()), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(n) = parse_version(&name) {
                versions.push((n, name));
            }
        }
        versions.sort();
        Ok(versions)
    }

    pub fn latest_version(&self) -> AppResult<Option<String>> {
        Ok(self.list_versions()?.pop())
    }

    /// Numbered past incomplete directories too, so publish never collides
    fn next_version(&self) -> AppResult<String> {
        let next = self
            .scan_versions()?
            .last()
            .map(|(n, _)| n + 1)
            .unwrap_or(1);
        Ok(format_version(next))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).map_err(|e| persistence(format!("cannot write {}", path.display()), e))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
        let raw = fs::read_to_string(path).map_err(|e| persistence(format!("cannot read {}", path.display()), e))?;
        serde_json::from_str(&raw).map_err(|e| persistence(format!("corrupt artifact {}", path.display()), e))
    }

    /// Write a new version and return its manifest
    pub fn publish(&self, request: PublishRequest<'_>) -> AppResult<ArtifactManifest> {
        fs::create_dir_all(&self.root)
            .map_err(|e| persistence(format!("cannot create {}", self.root.display()), e))?;

        let version = self.next_version()?;
        let manifest = ArtifactManifest {
            version: version.clone(),
            created_at: Utc::now(),
            app_version: APP_VERSION.to_string(),
            pipeline_layout: request.pipeline.layout_version.clone(),
            meta_layout: request.meta_learner.layout.clone(),
            meta_learner: request.meta_learner.kind_name().to_string(),
            base_models: request.base_models,
            training_rows: request.meta_learner.training_rows,
            metrics: request.metrics,
            meta_importance: request.meta_learner.importance(),
        };

        let tmp = self.root.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        let written = (|| -> AppResult<()> {
            fs::create_dir_all(tmp.join(BASE_MODELS_DIR))
                .map_err(|e| persistence(format!("cannot create {}", tmp.display()), e))?;
            Self::write_json(&tmp.join(PIPELINE_FILE), request.pipeline)?;
            Self::write_json(&tmp.join(META_LEARNER_FILE), request.meta_learner)?;
            for (name, artifact) in &request.base_model_artifacts {
                Self::write_json(&tmp.join(BASE_MODELS_DIR).join(format!("{}.json", name)), artifact)?;
            }
            // manifest last: a directory with a manifest is complete
            Self::write_json(&tmp.join(MANIFEST_FILE), &manifest)?;
            let target = self.root.join(&version);
            if target.exists() {
                return Err(AppError::persistence(format!("version {} already exists", version)));
            }
            fs::rename(&tmp, &target).map_err(|e| persistence(format!("cannot publish {}", version), e))
        })();

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&tmp) {
                warn!("⚠️ Could not remove temp dir {}: {}", tmp.display(), cleanup);
            }
            return Err(e);
        }

        info!("💾 Published model version {} to {}", version, self.root.display());
        Ok(manifest)
    }

    pub fn load(&self, version: &str) -> AppResult<ModelBundle> {
        let dir = self.root.join(version);
        if parse_version(version).is_none() || !dir.join(MANIFEST_FILE).exists() {
            return Err(AppError::version_not_found(version));
        }
        let manifest: ArtifactManifest = Self::read_json(&dir.join(MANIFEST_FILE))?;
        let pipeline: Pipeline = Self::read_json(&dir.join(PIPELINE_FILE))?;
        let meta_learner: MetaLearner = Self::read_json(&dir.join(META_LEARNER_FILE))?;
        debug!("📦 Loaded artifacts {}", version);
        Ok(ModelBundle {
            manifest,
            pipeline: Arc::new(pipeline),
            meta_learner: Arc::new(meta_learner),
        })
    }

    /// Stored artifact of one base model, if any
    pub fn load_base_model_artifact(&self, version: &str, model: &str) -> AppResult<Option<serde_json::Value>> {
        let path = self.root.join(version).join(BASE_MODELS_DIR).join(format!("{}.json", model));
        if !path.exists() {
            return Ok(None);
        }
        Self::read_json(&path).map(Some)
    }
}
