use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifact::ArtifactDir;
use super::handle::ModelHandle;

/// Polls `CURRENT` in the model directory and reloads the handle when the
/// named version changes. A failed reload leaves the live model untouched
/// and is retried on the next tick.
pub struct ModelWatcher {
    handle: Arc<ModelHandle>,
    dir: ArtifactDir,
    interval: Duration,
    load_timeout: Duration,
    cancel: CancellationToken,
}

impl ModelWatcher {
    pub fn new(
        handle: Arc<ModelHandle>,
        dir: ArtifactDir,
        interval: Duration,
        load_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            dir,
            interval,
            load_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to stop the watcher.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled.
    pub async fn run(self) {
        info!(dir = %self.dir.root().display(), interval_secs = self.interval.as_secs(), "Model watcher starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Model watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.poll().await;
                }
            }
        }
    }

    async fn poll(&self) {
        match self.handle.sync_with(&self.dir, self.load_timeout).await {
            Ok(true) => {}
            Ok(false) => debug!("Model version unchanged"),
            Err(e) => warn!(error = %e, "Model reload failed, keeping current model"),
        }
    }

    /// Spawn the watcher on the current runtime.
    pub fn spawn(self) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let token = self.cancel_token();
        (token, tokio::spawn(self.run()))
    }
}
