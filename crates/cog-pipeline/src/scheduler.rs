//! Parallel conversion scheduling.
//!
//! Fans a list of input files across a bounded pool of conversion workers
//! and stages each produced dataset for upload. Files are independent units
//! of work; completion order is unspecified and a single failure never
//! aborts the batch.

use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::convert::{ConvertedDataset, Converter};
use crate::dataset::{self, DatasetState, OutputLayout};
use crate::error::{PipelineError, Result};
use crate::identity::TileTemplate;
use crate::policy::{ProductPolicy, TimeFilter};

/// Default conversion worker pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Outcome of one conversion batch.
#[derive(Debug, Default)]
pub struct ConversionReport {
    /// Input files submitted
    pub total_files: usize,
    /// Files that converted without a file-level error
    pub converted_files: usize,
    /// Datasets renamed into TO_UPLOAD
    pub staged_datasets: usize,
    /// File-level failures; resubmit the file by name to retry
    pub failed: Vec<(PathBuf, PipelineError)>,
}

impl ConversionReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Convert `files` with up to `max_workers` concurrent workers.
///
/// As each file completes, its datasets get their upload-destination marker
/// and are renamed from WORKING into TO_UPLOAD. Results are drained in
/// completion order; per-file progress is logged as `completed/total`.
pub async fn run_conversion(
    files: &[PathBuf],
    converter: &Converter,
    layout: &OutputLayout,
    max_workers: usize,
    filter: Option<&TimeFilter>,
) -> Result<ConversionReport> {
    layout.ensure(&[DatasetState::Working, DatasetState::ToUpload])?;

    let total = files.len();
    let mut report = ConversionReport {
        total_files: total,
        ..Default::default()
    };

    let mut completions = stream::iter(files.iter().map(|file| async move {
        let outcome = converter.convert_file(file, layout, filter).await;
        (file, outcome)
    }))
    .buffer_unordered(max_workers.max(1));

    let mut completed = 0usize;
    while let Some((file, outcome)) = completions.next().await {
        completed += 1;
        match outcome {
            Ok(datasets) => {
                for ds in datasets {
                    match stage_dataset(converter.policy(), layout, &ds) {
                        Ok(destination) => {
                            report.staged_datasets += 1;
                            info!(
                                prefix = %ds.prefix,
                                destination = %destination,
                                "Dataset staged for upload"
                            );
                        }
                        Err(e) => {
                            // Dataset stays in WORKING; a re-run picks it up.
                            error!(prefix = %ds.prefix, error = %e, "Failed to stage dataset");
                            report.failed.push((file.clone(), e));
                        }
                    }
                }
                report.converted_files += 1;
                info!(completed, total, file = %file.display(), "Converted file");
            }
            Err(e) => {
                error!(completed, total, file = %file.display(), error = %e, "Conversion failed");
                report.failed.push((file.clone(), e));
            }
        }
    }

    info!(
        converted = report.converted_files,
        staged = report.staged_datasets,
        failed = report.failed.len(),
        "Conversion batch complete"
    );
    Ok(report)
}

/// Write a dataset's destination marker and rename it into TO_UPLOAD.
fn stage_dataset(
    policy: &ProductPolicy,
    layout: &OutputLayout,
    ds: &ConvertedDataset,
) -> Result<String> {
    // The prefix was formatted from dest_template, so the same template
    // resolves the identity back out of it.
    let template = TileTemplate::compile(&policy.dest_template)?;
    let identity = template.resolve(&ds.prefix)?;
    let destination = policy.resolve_destination(&identity)?;

    dataset::write_upload_destination(&ds.dir, &destination)?;
    layout.promote(&ds.prefix, DatasetState::Working, DatasetState::ToUpload)?;
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BandFailureMode, TimeMode};
    use crate::test_support::FakeEngine;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    fn test_policy() -> ProductPolicy {
        ProductPolicy {
            time_mode: TimeMode::Notime,
            source_template: "tile_{x}_{y}.nc".to_string(),
            dest_template: "tile_{x}_{y}".to_string(),
            src_dir: None,
            bucket: "s3://bucket".to_string(),
            aws_dir: "product/v1".to_string(),
            aws_dir_suffix_template: None,
            default_resampling: "average".to_string(),
            band_resampling: HashMap::new(),
            band_allow_list: None,
            band_deny_list: Vec::new(),
            no_pyramid_bands: HashSet::new(),
            band_failure_mode: BandFailureMode::default(),
        }
    }

    #[tokio::test]
    async fn test_batch_stages_datasets() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        let converter = Converter::new(Arc::new(FakeEngine::new(&["water"])), test_policy());

        let files = vec![PathBuf::from("tile_9_-39.nc"), PathBuf::from("tile_10_-39.nc")];
        let report = run_conversion(&files, &converter, &layout, 2, None)
            .await
            .unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.converted_files, 2);
        assert_eq!(report.staged_datasets, 2);
        assert!(!report.has_failures());

        assert_eq!(
            layout.list(DatasetState::ToUpload).unwrap(),
            vec!["tile_10_-39", "tile_9_-39"]
        );
        assert!(layout.list(DatasetState::Working).unwrap().is_empty());

        let staged = layout.dataset_dir(DatasetState::ToUpload, "tile_9_-39");
        assert_eq!(
            dataset::read_upload_destination(&staged).unwrap().as_deref(),
            Some("s3://bucket/product/v1/x_9/y_-39")
        );
        assert!(staged.join("tile_9_-39_water.tif").exists());
    }

    #[tokio::test]
    async fn test_failed_file_does_not_abort_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        let converter = Converter::new(Arc::new(FakeEngine::new(&["water"])), test_policy());

        // The second file does not match the product template.
        let files = vec![PathBuf::from("tile_9_-39.nc"), PathBuf::from("garbage.nc")];
        let report = run_conversion(&files, &converter, &layout, 2, None)
            .await
            .unwrap();

        assert_eq!(report.converted_files, 1);
        assert_eq!(report.staged_datasets, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, PathBuf::from("garbage.nc"));
    }
}
