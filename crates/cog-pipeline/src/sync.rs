//! Remote sync collaborator.
//!
//! Transfer of a staged dataset directory is delegated to an external
//! directory-sync tool; [`AwsCliSync`] shells out to `aws s3 sync`.

use std::path::Path;

use async_trait::async_trait;

use crate::engine::run_command;
use crate::error::Result;

/// External directory-to-remote synchronizer.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Synchronize a local directory to a remote path, excluding one file.
    async fn sync_dir(&self, local: &Path, remote: &str, exclude: &str) -> Result<()>;
}

/// `aws s3 sync` implementation of [`RemoteSync`].
#[derive(Debug, Clone)]
pub struct AwsCliSync {
    aws: String,
}

impl Default for AwsCliSync {
    fn default() -> Self {
        Self {
            aws: "aws".to_string(),
        }
    }
}

impl AwsCliSync {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteSync for AwsCliSync {
    async fn sync_dir(&self, local: &Path, remote: &str, exclude: &str) -> Result<()> {
        let args = vec![
            "s3".to_string(),
            "sync".to_string(),
            local.display().to_string(),
            remote.to_string(),
            "--exclude".to_string(),
            exclude.to_string(),
        ];
        run_command(&self.aws, &args).await?;
        Ok(())
    }
}
