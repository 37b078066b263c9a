//! Raster engine collaborator.
//!
//! The pipeline never touches pixels itself; every raster operation is a
//! discrete invocation of the external GDAL toolchain. [`RasterEngine`] is
//! the seam, [`GdalCommandEngine`] the production implementation. Engine
//! behavior flags travel in an explicit [`EngineConfig`] per invocation
//! rather than process-wide environment variables.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Overview levels built into every pyramided band.
pub const OVERVIEW_LEVELS: [u32; 5] = [2, 4, 8, 16, 32];

/// Per-invocation GDAL behavior flags.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Suppress directory listing on open (`GDAL_DISABLE_READDIR_ON_OPEN`)
    pub disable_readdir_on_open: bool,
    /// Extensions the VSI curl driver may probe (`CPL_VSIL_CURL_ALLOWED_EXTENSIONS`)
    pub vsil_curl_allowed_extensions: Option<String>,
    /// Overview tile size (`GDAL_TIFF_OVR_BLOCKSIZE`)
    pub overview_blocksize: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disable_readdir_on_open: true,
            vsil_curl_allowed_extensions: Some(".tif".to_string()),
            overview_blocksize: 512,
        }
    }
}

impl EngineConfig {
    /// Render the flags as `--config KEY VALUE` argument pairs.
    fn config_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.disable_readdir_on_open {
            args.extend([
                "--config".to_string(),
                "GDAL_DISABLE_READDIR_ON_OPEN".to_string(),
                "YES".to_string(),
            ]);
        }
        if let Some(ext) = &self.vsil_curl_allowed_extensions {
            args.extend([
                "--config".to_string(),
                "CPL_VSIL_CURL_ALLOWED_EXTENSIONS".to_string(),
                ext.clone(),
            ]);
        }
        args
    }

    fn blocksize_args(&self) -> Vec<String> {
        vec![
            "--config".to_string(),
            "GDAL_TIFF_OVR_BLOCKSIZE".to_string(),
            self.overview_blocksize.to_string(),
        ]
    }
}

/// One raster layer embedded in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdataset {
    /// Full GDAL identifier, e.g. `NETCDF:"/path/file.nc":water`
    pub identifier: String,
    /// Short band name (the identifier's last `:`-separated component)
    pub band_name: String,
}

/// Everything the pipeline needs to know about a source file.
#[derive(Debug, Clone, Default)]
pub struct SourceDescription {
    /// Embedded raster layers, in declaration order
    pub subdatasets: Vec<Subdataset>,
    /// The embedded time coordinate, one entry per slice
    pub time_values: Vec<NaiveDateTime>,
    /// Embedded dataset metadata documents, one per slice
    pub dataset_documents: Vec<String>,
}

/// External raster-processing engine.
#[async_trait]
pub trait RasterEngine: Send + Sync {
    /// Inspect a source file: subdatasets, time coordinate, embedded metadata.
    async fn describe(&self, file: &Path) -> Result<SourceDescription>;

    /// Extract one band of a subdataset into a plain raster file.
    async fn extract_band(
        &self,
        subdataset: &str,
        band: u32,
        out: &Path,
        config: &EngineConfig,
    ) -> Result<()>;

    /// Build internal overview levels on a raster with the given resampling.
    async fn build_overviews(
        &self,
        file: &Path,
        levels: &[u32],
        resampling: &str,
        config: &EngineConfig,
    ) -> Result<()>;

    /// Re-encode a raster as tiled, compressed, predictor-enabled output,
    /// copying any overview levels into the result.
    async fn encode_cog(&self, src: &Path, dest: &Path, config: &EngineConfig) -> Result<()>;
}

/// Run an external command, failing on nonzero exit.
pub(crate) async fn run_command(program: &str, args: &[String]) -> Result<Output> {
    let rendered = format!("{} {}", program, args.join(" ")).trim_end().to_string();
    debug!(command = %rendered, "Running external command");

    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(PipelineError::ExternalTool {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// GDAL command-line implementation of [`RasterEngine`].
#[derive(Debug, Clone)]
pub struct GdalCommandEngine {
    gdalinfo: String,
    gdal_translate: String,
    gdaladdo: String,
    ncdump: String,
}

impl Default for GdalCommandEngine {
    fn default() -> Self {
        Self {
            gdalinfo: "gdalinfo".to_string(),
            gdal_translate: "gdal_translate".to_string(),
            gdaladdo: "gdaladdo".to_string(),
            ncdump: "ncdump".to_string(),
        }
    }
}

impl GdalCommandEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RasterEngine for GdalCommandEngine {
    async fn describe(&self, file: &Path) -> Result<SourceDescription> {
        let args = vec!["-json".to_string(), file.display().to_string()];
        let output = run_command(&self.gdalinfo, &args).await?;
        let info: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Metadata(format!("unparseable gdalinfo output: {e}")))?;

        let subdatasets = parse_subdatasets(&info);
        let time_values = parse_time_values(&info);

        // Sources without an embedded `dataset` variable still convert;
        // their metadata step is skipped with a logged warning downstream.
        let dataset_documents = match run_command(
            &self.ncdump,
            &["-v".to_string(), "dataset".to_string(), file.display().to_string()],
        )
        .await
        {
            Ok(output) => {
                parse_cdl_char_rows(&String::from_utf8_lossy(&output.stdout), "dataset")
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "No embedded dataset documents");
                Vec::new()
            }
        };

        Ok(SourceDescription {
            subdatasets,
            time_values,
            dataset_documents,
        })
    }

    async fn extract_band(
        &self,
        subdataset: &str,
        band: u32,
        out: &Path,
        config: &EngineConfig,
    ) -> Result<()> {
        let mut args = vec![
            "-of".to_string(),
            "GTIFF".to_string(),
            "-b".to_string(),
            band.to_string(),
        ];
        args.extend(config.config_args());
        args.push(subdataset.to_string());
        args.push(out.display().to_string());

        run_command(&self.gdal_translate, &args).await?;
        Ok(())
    }

    async fn build_overviews(
        &self,
        file: &Path,
        levels: &[u32],
        resampling: &str,
        config: &EngineConfig,
    ) -> Result<()> {
        let mut args = vec!["-r".to_string(), resampling.to_string()];
        args.extend(config.blocksize_args());
        args.push(file.display().to_string());
        args.extend(levels.iter().map(|l| l.to_string()));

        run_command(&self.gdaladdo, &args).await?;
        Ok(())
    }

    async fn encode_cog(&self, src: &Path, dest: &Path, config: &EngineConfig) -> Result<()> {
        let mut args: Vec<String> = [
            "-co", "TILED=YES",
            "-co", "COPY_SRC_OVERVIEWS=YES",
            "-co", "COMPRESS=DEFLATE",
            "-co", "ZLEVEL=9",
            "-co", "BLOCKXSIZE=512",
            "-co", "BLOCKYSIZE=512",
            "-co", "PREDICTOR=2",
            "-co", "PROFILE=GeoTIFF",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(config.blocksize_args());
        args.push(src.display().to_string());
        args.push(dest.display().to_string());

        run_command(&self.gdal_translate, &args).await?;
        Ok(())
    }
}

/// Pull the ordered subdataset list out of `gdalinfo -json` output.
fn parse_subdatasets(info: &serde_json::Value) -> Vec<Subdataset> {
    let map = match info.pointer("/metadata/SUBDATASETS").and_then(|v| v.as_object()) {
        Some(map) => map,
        None => return Vec::new(),
    };

    let mut subdatasets = Vec::new();
    for index in 1.. {
        let identifier = match map
            .get(&format!("SUBDATASET_{index}_NAME"))
            .and_then(|v| v.as_str())
        {
            Some(name) => name.to_string(),
            None => break,
        };
        let band_name = identifier
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .to_string();
        subdatasets.push(Subdataset {
            identifier,
            band_name,
        });
    }
    subdatasets
}

/// Parse `NETCDF_DIM_time_VALUES` (epoch seconds) from `gdalinfo -json` output.
fn parse_time_values(info: &serde_json::Value) -> Vec<NaiveDateTime> {
    let raw = info
        .pointer("/metadata//NETCDF_DIM_time_VALUES")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            let seconds: f64 = match token.parse() {
                Ok(s) => s,
                Err(_) => {
                    warn!(token = %token, "Unparseable time coordinate value");
                    return None;
                }
            };
            let nanos = ((seconds.fract()) * 1e9) as u32;
            DateTime::from_timestamp(seconds.trunc() as i64, nanos).map(|dt| dt.naive_utc())
        })
        .collect()
}

/// Parse the rows of a CDL char variable out of `ncdump -v <var>` output.
///
/// In the data section each row is a comma-separated sequence of quoted
/// string constants; adjacent constants within a row concatenate. Escape
/// sequences cover what ncdump emits for text data.
fn parse_cdl_char_rows(cdl: &str, variable: &str) -> Vec<String> {
    let marker = format!("{variable} =");
    let data_start = match cdl.find("data:").and_then(|d| {
        cdl[d..].find(&marker).map(|m| d + m + marker.len())
    }) {
        Some(start) => start,
        None => return Vec::new(),
    };

    let mut rows = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut saw_constant = false;
    let mut chars = cdl[data_start..].chars();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => in_quotes = false,
                '\\' => match chars.next() {
                    Some('n') => current.push('\n'),
                    Some('t') => current.push('\t'),
                    Some('r') => current.push('\r'),
                    Some('0') => {}
                    Some(other) => current.push(other),
                    None => break,
                },
                other => current.push(other),
            }
        } else {
            match c {
                '"' => {
                    in_quotes = true;
                    saw_constant = true;
                }
                ',' => {
                    if saw_constant {
                        rows.push(std::mem::take(&mut current));
                        saw_constant = false;
                    }
                }
                ';' => break,
                _ => {}
            }
        }
    }
    if saw_constant {
        rows.push(current);
    }
    rows
}
