//! Conversion of one source file into COG dataset directories.
//!
//! Each time slice of a source file becomes one dataset directory under
//! `WORKING/`: a COG per retained band plus the rewritten metadata document.
//! Every output is skip-if-exists, so a re-run after a crash or partial
//! failure only regenerates what is missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dataset::{DatasetState, OutputLayout};
use crate::engine::{EngineConfig, RasterEngine, Subdataset, OVERVIEW_LEVELS};
use crate::error::Result;
use crate::identity::TileTemplate;
use crate::metadata::write_dataset_document;
use crate::policy::{BandFailureMode, DatasetSlice, ProductPolicy, TimeFilter};

/// One dataset directory produced by a conversion.
#[derive(Debug, Clone)]
pub struct ConvertedDataset {
    pub prefix: String,
    pub dir: PathBuf,
}

/// Drives the raster engine to convert source files per a product policy.
pub struct Converter {
    engine: Arc<dyn RasterEngine>,
    policy: ProductPolicy,
    engine_config: EngineConfig,
}

impl Converter {
    pub fn new(engine: Arc<dyn RasterEngine>, policy: ProductPolicy) -> Self {
        Self {
            engine,
            policy,
            engine_config: EngineConfig::default(),
        }
    }

    pub fn with_engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    pub fn policy(&self) -> &ProductPolicy {
        &self.policy
    }

    /// Convert every dataset slice of `input` into the layout's WORKING area.
    ///
    /// Returns the dataset directories produced (or found already present).
    /// Individual band failures are logged and handled per the policy's
    /// failure mode; identity or metadata failures fail the whole file.
    pub async fn convert_file(
        &self,
        input: &Path,
        layout: &OutputLayout,
        filter: Option<&TimeFilter>,
    ) -> Result<Vec<ConvertedDataset>> {
        let template = TileTemplate::compile(&self.policy.source_template)?;
        let identity = template.resolve(input)?;
        let description = self.engine.describe(input).await?;

        let slices = self
            .policy
            .dataset_slices(&identity, &description.time_values, filter)?;
        if slices.is_empty() {
            warn!(file = %input.display(), "Source file yields no dataset slices");
        }

        let working = layout.state_dir(DatasetState::Working);
        let mut produced = Vec::new();
        for slice in &slices {
            let dest = working.join(&slice.prefix);
            fs::create_dir_all(&dest)?;

            match description.dataset_documents.get(slice.band as usize - 1) {
                Some(document) => {
                    write_dataset_document(document, &slice.prefix, &dest)?;
                }
                None => {
                    warn!(prefix = %slice.prefix, "No embedded dataset document for slice");
                }
            }

            self.convert_bands(&description.subdatasets, slice, &dest)
                .await?;
            remove_sidecars(&dest)?;

            produced.push(ConvertedDataset {
                prefix: slice.prefix.clone(),
                dir: dest,
            });
        }
        Ok(produced)
    }

    /// Run the band pipeline for one dataset slice.
    async fn convert_bands(
        &self,
        subdatasets: &[Subdataset],
        slice: &DatasetSlice,
        dest: &Path,
    ) -> Result<()> {
        let scratch = tempfile::tempdir()?;

        for subdataset in subdatasets {
            let band = &subdataset.band_name;
            if !self.policy.retain_band(band) {
                debug!(band = %band, "Band filtered out");
                continue;
            }

            let file_name = format!("{}_{}.tif", slice.prefix, band);
            let out_path = dest.join(&file_name);
            if out_path.exists() {
                debug!(path = %out_path.display(), "Band file already exists, skipping");
                continue;
            }

            match self
                .convert_band(subdataset, slice.band, &file_name, &out_path, scratch.path())
                .await
            {
                Ok(()) => {
                    info!(path = %out_path.display(), "Wrote band COG");
                }
                Err(e) => {
                    error!(band = %band, prefix = %slice.prefix, error = %e, "Band conversion failed");
                    if self.policy.band_failure_mode == BandFailureMode::Abort {
                        warn!(prefix = %slice.prefix, "Abandoning remaining bands of slice");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn convert_band(
        &self,
        subdataset: &Subdataset,
        band: u32,
        file_name: &str,
        out_path: &Path,
        scratch: &Path,
    ) -> Result<()> {
        let temp_path = scratch.join(file_name);

        self.engine
            .extract_band(&subdataset.identifier, band, &temp_path, &self.engine_config)
            .await?;

        if self.policy.skip_pyramids(&subdataset.band_name) {
            debug!(band = %subdataset.band_name, "Pyramid building disabled for band");
        } else {
            self.engine
                .build_overviews(
                    &temp_path,
                    &OVERVIEW_LEVELS,
                    self.policy.resampling_for(&subdataset.band_name),
                    &self.engine_config,
                )
                .await?;
        }

        self.engine
            .encode_cog(&temp_path, out_path, &self.engine_config)
            .await?;
        Ok(())
    }
}

/// Delete engine-generated `*.xml` sidecar files from a dataset directory.
fn remove_sidecars(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".xml") {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
