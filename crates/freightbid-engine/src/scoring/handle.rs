use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::artifact::ArtifactDir;
use super::ScoringModel;
use crate::error::ScoringError;

/// A model together with the version it was loaded as.
pub struct ActiveModel {
    pub version: String,
    pub model: Arc<dyn ScoringModel>,
}

/// Process-wide handle to the live scoring model.
///
/// Readers take a snapshot with [`ModelHandle::current`] and never block.
/// Reloads are serialized on `reload_gate` and publish a fully built model in
/// a single swap, so a reader sees either the old model or the new one.
pub struct ModelHandle {
    active: ArcSwapOption<ActiveModel>,
    reload_gate: Mutex<()>,
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelHandle {
    pub fn new() -> Self {
        Self {
            active: ArcSwapOption::empty(),
            reload_gate: Mutex::new(()),
        }
    }

    pub fn preloaded(version: &str, model: Arc<dyn ScoringModel>) -> Self {
        let handle = Self::new();
        handle.install(version, model);
        handle
    }

    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        self.active.load_full()
    }

    pub fn version(&self) -> Option<String> {
        self.active.load().as_ref().map(|m| m.version.clone())
    }

    pub fn install(&self, version: &str, model: Arc<dyn ScoringModel>) {
        self.active.store(Some(Arc::new(ActiveModel {
            version: version.to_string(),
            model,
        })));
    }

    /// Load `version` from `dir` and make it live. Returns `false` when that
    /// version is already live. On failure the previous model stays in place.
    pub async fn reload(
        &self,
        dir: &ArtifactDir,
        version: &str,
        timeout: Duration,
    ) -> Result<bool, ScoringError> {
        let _gate = self.reload_gate.lock().await;
        if self.version().as_deref() == Some(version) {
            return Ok(false);
        }

        let dir = dir.clone();
        let owned = version.to_string();
        let load = tokio::task::spawn_blocking(move || dir.load(&owned));
        let artifact = match tokio::time::timeout(timeout, load).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(ScoringError::Malformed(format!("artifact loader panicked: {join}")))
            }
            Err(_) => {
                warn!(version, timeout_ms = timeout.as_millis() as u64, "Model load timed out");
                return Err(ScoringError::Timeout(timeout.as_millis() as u64));
            }
        };

        let previous = self.version();
        self.install(version, Arc::new(artifact));
        info!(version, previous = ?previous, "Scoring model loaded");
        Ok(true)
    }

    /// Reload whatever `CURRENT` points at. Returns `false` when nothing
    /// changed.
    pub async fn sync_with(&self, dir: &ArtifactDir, timeout: Duration) -> Result<bool, ScoringError> {
        match dir.current_version()? {
            Some(version) => self.reload(dir, &version, timeout).await,
            None => Ok(false),
        }
    }
}
