//! Model Registry
//!
//! Owns the lifecycle of persisted model versions:
//! - `init` loads the latest published version (if any)
//! - `reload` re-scans the store and swaps in a newer version
//! - `activate` pins a specific version
//! - `teardown` drops everything
//!
//! Loaded bundles are cached in a `DashMap` keyed by version; activating a
//! version evicts every other entry. The active bundle is an `Arc` behind a
//! short-lived `RwLock`; callers take a snapshot and keep scoring against it
//! even if a swap happens meanwhile.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::models::errors::{AppError, AppResult};
use crate::utils::store::{ArtifactManifest, ArtifactStore, ModelBundle, PublishRequest};

/// Held for the duration of one training cycle
#[derive(Debug)]
pub struct TrainingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ModelRegistry {
    store: ArtifactStore,
    loaded: DashMap<String, Arc<ModelBundle>>,
    active: RwLock<Option<Arc<ModelBundle>>>,
    training: AtomicBool,
}

impl ModelRegistry {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            loaded: DashMap::new(),
            active: RwLock::new(None),
            training: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Load the latest version; `None` when nothing is published yet
    pub fn init(&self) -> AppResult<Option<String>> {
        match self.store.latest_version()? {
            Some(version) => {
                self.activate(&version)?;
                info!("🚀 Registry initialised with model {}", version);
                Ok(Some(version))
            }
            None => {
                info!("📭 No published model in {}, scoring disabled until training", self.store.root().display());
                Ok(None)
            }
        }
    }

    /// Swap to the latest version if it differs from the active one
    pub fn reload(&self) -> AppResult<Option<String>> {
        let Some(latest) = self.store.latest_version()? else {
            return Ok(self.active_version());
        };
        if self.active_version().as_deref() == Some(latest.as_str()) {
            debug!("Registry already on {}", latest);
            return Ok(Some(latest));
        }
        self.activate(&latest)?;
        Ok(Some(latest))
    }

    /// Make `version` the active bundle, loading it if needed
    pub fn activate(&self, version: &str) -> AppResult<Arc<ModelBundle>> {
        let bundle = self.get_or_load(version)?;
        self.swap(Some(bundle.clone()));
        // outstanding snapshots keep their own Arc
        self.loaded.retain(|cached, _| cached == version);
        info!("🔁 Active model is now {}", version);
        Ok(bundle)
    }

    fn get_or_load(&self, version: &str) -> AppResult<Arc<ModelBundle>> {
        if let Some(entry) = self.loaded.get(version) {
            debug!("💾 Registry HIT: {}", version);
            return Ok(entry.value().clone());
        }
        debug!("🔍 Registry MISS: {}", version);
        let bundle = Arc::new(self.store.load(version)?);
        self.loaded.insert(version.to_string(), bundle.clone());
        Ok(bundle)
    }

    fn swap(&self, bundle: Option<Arc<ModelBundle>>) {
        match self.active.write() {
            Ok(mut guard) => *guard = bundle,
            Err(poisoned) => *poisoned.into_inner() = bundle,
        }
    }

    /// Snapshot of the active bundle
    pub fn active(&self) -> Option<Arc<ModelBundle>> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Active bundle or `ModelNotReady`
    pub fn require_active(&self) -> AppResult<Arc<ModelBundle>> {
        self.active()
            .ok_or_else(|| AppError::model_not_ready("no model version is active; train or publish one first"))
    }

    pub fn active_version(&self) -> Option<String> {
        self.active().map(|b| b.version().to_string())
    }

    pub fn versions(&self) -> AppResult<Vec<String>> {
        self.store.list_versions()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Claim the single training slot
    pub fn begin_training(&self) -> AppResult<TrainingGuard<'_>> {
        self.training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::training_in_progress())?;
        Ok(TrainingGuard { flag: &self.training })
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }

    /// Persist a new version and make it active. Requires the training slot.
    pub fn publish(&self, _guard: &TrainingGuard<'_>, request: PublishRequest<'_>) -> AppResult<Arc<ModelBundle>> {
        let manifest: ArtifactManifest = self.store.publish(request)?;
        self.activate(&manifest.version)
    }

    /// Drop every loaded version and the active pointer
    pub fn teardown(&self) {
        self.swap(None);
        self.loaded.clear();
        info!("🧹 Registry torn down");
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("root", &self.store.root())
            .field("active", &self.active_version())
            .field("loaded", &self.loaded.len())
            .finish()
    }
}
