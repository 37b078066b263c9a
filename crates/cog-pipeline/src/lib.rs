//! Batch COG conversion and staged-upload pipeline.
//!
//! Converts tiled NetCDF archives into Cloud Optimised GeoTIFF datasets and
//! stages them for upload to object storage, resuming safely across
//! restarts. The pipeline is pure coordination: pixel work is delegated to
//! the external GDAL toolchain and transfer to an external sync tool.
//!
//! # Architecture
//!
//! - Filename templates resolve each source file to a tile identity
//! - A per-product policy decides band selection, resampling, and the
//!   dataset's remote destination
//! - The converter produces one dataset directory per time slice under
//!   `WORKING/`, one COG per band plus a metadata document
//! - The scheduler fans files across a bounded worker pool and renames
//!   finished datasets into `TO_UPLOAD/`
//! - The upload watcher polls `TO_UPLOAD/`, syncs each dataset to its
//!   recorded destination, and moves it to `COMPLETE/`/`FAILED/` (or
//!   deletes it)
//!
//! Every output file is skip-if-exists, so re-running a batch only
//! regenerates what is missing.

pub mod config;
pub mod convert;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod policy;
pub mod scheduler;
pub mod sync;
pub mod watcher;
pub mod worklist;

#[cfg(test)]
mod test_support;

// Re-exports
pub use config::ProductSet;
pub use convert::{ConvertedDataset, Converter};
pub use dataset::{DatasetState, OutputLayout, UPLOAD_DESTINATION_FILE};
pub use engine::{EngineConfig, GdalCommandEngine, RasterEngine, SourceDescription, Subdataset};
pub use error::{PipelineError, Result};
pub use identity::{FilenameTokens, TileIdentity, TileTemplate};
pub use policy::{BandFailureMode, DatasetSlice, ProductPolicy, TimeFilter, TimeMode};
pub use scheduler::{run_conversion, ConversionReport, DEFAULT_WORKERS};
pub use sync::{AwsCliSync, RemoteSync};
pub use watcher::UploadWatcher;
pub use worklist::generate_work_list;
