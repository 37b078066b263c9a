//! Shared fakes for unit tests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{EngineConfig, RasterEngine, SourceDescription, Subdataset};
use crate::error::{PipelineError, Result};
use crate::sync::RemoteSync;

/// Raster engine fake: records invocations, writes placeholder files.
pub(crate) struct FakeEngine {
    description: SourceDescription,
    pub(crate) calls: Mutex<Vec<String>>,
    fail_bands: HashSet<String>,
}

impl FakeEngine {
    pub(crate) fn new(bands: &[&str]) -> Self {
        let subdatasets = bands
            .iter()
            .map(|b| Subdataset {
                identifier: format!("NETCDF:\"input.nc\":{b}"),
                band_name: b.to_string(),
            })
            .collect();
        Self {
            description: SourceDescription {
                subdatasets,
                time_values: Vec::new(),
                dataset_documents: vec![
                    "image:\n  bands:\n    water:\n      path: input.nc\n".to_string(),
                ],
            },
            calls: Mutex::new(Vec::new()),
            fail_bands: HashSet::new(),
        }
    }

    /// Make extraction of the named band fail.
    pub(crate) fn failing(mut self, band: &str) -> Self {
        self.fail_bands.insert(band.to_string());
        self
    }

    pub(crate) fn calls_matching(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(op))
            .count()
    }
}

#[async_trait]
impl RasterEngine for FakeEngine {
    async fn describe(&self, _file: &Path) -> Result<SourceDescription> {
        Ok(self.description.clone())
    }

    async fn extract_band(
        &self,
        subdataset: &str,
        band: u32,
        out: &Path,
        _config: &EngineConfig,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("extract {subdataset} {band}"));
        let band_name = subdataset.rsplit(':').next().unwrap();
        if self.fail_bands.contains(band_name) {
            return Err(PipelineError::ExternalTool {
                command: format!("gdal_translate {subdataset}"),
                status: 1,
                stderr: "simulated failure".to_string(),
            });
        }
        fs::write(out, b"raster")?;
        Ok(())
    }

    async fn build_overviews(
        &self,
        file: &Path,
        _levels: &[u32],
        resampling: &str,
        _config: &EngineConfig,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("overviews {} {resampling}", file.display()));
        Ok(())
    }

    async fn encode_cog(&self, src: &Path, dest: &Path, _config: &EngineConfig) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("encode {}", dest.display()));
        fs::copy(src, dest)?;
        Ok(())
    }
}

/// Remote sync fake: records sync calls, fails on request.
pub(crate) struct FakeSync {
    pub(crate) calls: Mutex<Vec<(PathBuf, String, String)>>,
    fail_remotes: HashSet<String>,
}

impl FakeSync {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_remotes: HashSet::new(),
        }
    }

    /// Make syncs to the given remote path fail.
    pub(crate) fn failing(mut self, remote: &str) -> Self {
        self.fail_remotes.insert(remote.to_string());
        self
    }
}

#[async_trait]
impl RemoteSync for FakeSync {
    async fn sync_dir(&self, local: &Path, remote: &str, exclude: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote.to_string(), exclude.to_string()));
        if self.fail_remotes.contains(remote) {
            return Err(PipelineError::ExternalTool {
                command: format!("aws s3 sync {} {remote}", local.display()),
                status: 1,
                stderr: "simulated sync failure".to_string(),
            });
        }
        Ok(())
    }
}
