//! Upload watcher over the TO_UPLOAD staging area.
//!
//! A long-running poller: each cycle lists staged datasets, syncs each one
//! with a readable destination marker to its recorded remote path, and gives
//! it exactly one terminal disposition (COMPLETE, deleted, or FAILED). The
//! watcher exits once it has been idle longer than the configured timeout —
//! but the idle timer only arms after the first processed dataset, so a
//! watcher that never sees work polls forever.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::dataset::{read_upload_destination, DatasetState, OutputLayout, UPLOAD_DESTINATION_FILE};
use crate::error::Result;
use crate::sync::RemoteSync;

/// Default pause between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default idle period after which the watcher terminates.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Polls TO_UPLOAD and drives staged datasets to a terminal state.
pub struct UploadWatcher {
    sync: Arc<dyn RemoteSync>,
    layout: OutputLayout,
    retain_datasets: bool,
    poll_interval: Duration,
    idle_timeout: Duration,
}

impl UploadWatcher {
    pub fn new(sync: Arc<dyn RemoteSync>, layout: OutputLayout, retain_datasets: bool) -> Self {
        Self {
            sync,
            layout,
            retain_datasets,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, idle_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Poll until the idle timeout elapses.
    ///
    /// Datasets are handled strictly sequentially within a cycle; a failure
    /// on one dataset never stops the rest.
    pub async fn run(&self) -> Result<()> {
        self.layout.ensure(&[
            DatasetState::ToUpload,
            DatasetState::Complete,
            DatasetState::Failed,
        ])?;

        let mut last_processed: Option<Instant> = None;
        loop {
            for prefix in self.layout.list(DatasetState::ToUpload)? {
                let dir = self.layout.dataset_dir(DatasetState::ToUpload, &prefix);
                let destination = match read_upload_destination(&dir) {
                    Ok(Some(destination)) => destination,
                    Ok(None) => {
                        // Not fully staged yet; look again next cycle.
                        debug!(prefix = %prefix, "Dataset has no destination marker");
                        continue;
                    }
                    Err(e) => {
                        error!(prefix = %prefix, error = %e, "Unreadable destination marker");
                        continue;
                    }
                };

                self.process_dataset(&prefix, &dir, &destination).await;
                last_processed = Some(Instant::now());
            }

            sleep(self.poll_interval).await;

            if let Some(last) = last_processed {
                if last.elapsed() > self.idle_timeout {
                    info!(
                        idle_secs = self.idle_timeout.as_secs(),
                        "No datasets processed within idle timeout, stopping watcher"
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Sync one dataset and apply its terminal transition.
    async fn process_dataset(&self, prefix: &str, dir: &Path, destination: &str) {
        info!(prefix = %prefix, destination = %destination, "Uploading dataset");

        match self
            .sync
            .sync_dir(dir, destination, UPLOAD_DESTINATION_FILE)
            .await
        {
            Ok(()) => {
                let finalized = if self.retain_datasets {
                    self.layout
                        .promote(prefix, DatasetState::ToUpload, DatasetState::Complete)
                        .map(|_| "retained")
                } else {
                    self.layout
                        .discard(prefix, DatasetState::ToUpload)
                        .map(|_| "deleted")
                };
                match finalized {
                    Ok(disposition) => {
                        info!(prefix = %prefix, disposition, "Dataset uploaded");
                    }
                    Err(e) => {
                        error!(prefix = %prefix, error = %e, "Failed to finalize uploaded dataset");
                        self.mark_failed(prefix);
                    }
                }
            }
            Err(e) => {
                error!(prefix = %prefix, destination = %destination, error = %e, "Upload failed");
                self.mark_failed(prefix);
            }
        }
    }

    fn mark_failed(&self, prefix: &str) {
        if let Err(e) = self
            .layout
            .promote(prefix, DatasetState::ToUpload, DatasetState::Failed)
        {
            error!(prefix = %prefix, error = %e, "Failed to move dataset to FAILED");
        }
    }
}
