//! Dataset metadata document handling.
//!
//! Each source file embeds one YAML dataset record per time slice. The
//! converter rewrites the record's band references to point at the produced
//! COG files and persists it next to them as `<prefix>.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Rewrite an embedded dataset record and persist it as `<prefix>.yaml`.
///
/// Band entries get `layer: "1"` and a `path` naming the band's COG file;
/// the format is stamped as GeoTIFF and lineage is cleared. An existing
/// document is left untouched so re-runs never regenerate output.
pub fn write_dataset_document(document: &str, prefix: &str, dest_dir: &Path) -> Result<PathBuf> {
    let target = dest_dir.join(format!("{prefix}.yaml"));
    if target.exists() {
        debug!(path = %target.display(), "Dataset document already exists, skipping");
        return Ok(target);
    }

    let mut dataset: Value = serde_yaml::from_str(document)
        .map_err(|e| PipelineError::Metadata(format!("unparseable dataset record: {e}")))?;

    let bands = dataset
        .get_mut("image")
        .and_then(|image| image.get_mut("bands"))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            PipelineError::Metadata("dataset record has no image.bands mapping".to_string())
        })?;

    for (name, band) in bands.iter_mut() {
        let band_name = name.as_str().ok_or_else(|| {
            PipelineError::Metadata("non-string band name in dataset record".to_string())
        })?;
        let band = band.as_mapping_mut().ok_or_else(|| {
            PipelineError::Metadata(format!("band {band_name:?} is not a mapping"))
        })?;
        band.insert(Value::from("layer"), Value::from("1"));
        band.insert(Value::from("path"), Value::from(format!("{prefix}_{band_name}.tif")));
    }

    let root = dataset.as_mapping_mut().ok_or_else(|| {
        PipelineError::Metadata("dataset record is not a mapping".to_string())
    })?;

    let mut format = Mapping::new();
    format.insert(Value::from("name"), Value::from("GeoTIFF"));
    root.insert(Value::from("format"), Value::Mapping(format));

    let mut lineage = Mapping::new();
    lineage.insert(Value::from("source_datasets"), Value::Mapping(Mapping::new()));
    root.insert(Value::from("lineage"), Value::Mapping(lineage));

    let rendered = serde_yaml::to_string(&dataset)
        .map_err(|e| PipelineError::Metadata(format!("unserializable dataset record: {e}")))?;
    fs::write(&target, rendered)?;

    info!(path = %target.display(), "Wrote dataset document");
    Ok(target)
}
