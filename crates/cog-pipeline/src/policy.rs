//! Per-product conversion policy.
//!
//! A [`ProductPolicy`] is pure configuration: how a product's filenames are
//! laid out, where its converted datasets go in the bucket, which bands to
//! keep, and how overviews are resampled. Policies are loaded from the
//! products YAML file (see [`crate::config`]) and never mutated.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{Datelike, NaiveDateTime};
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::identity::TileIdentity;

/// How a product's acquisition time is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Time token is parsed from the source filename
    Filename,
    /// Time slices are enumerated from the source file's time coordinate
    Dataset,
    /// Product has no time dimension
    Notime,
}

/// What to do with the rest of a dataset slice after one band fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandFailureMode {
    /// Log the failure and keep converting the remaining bands
    #[default]
    Continue,
    /// Abandon the remaining bands of the slice
    Abort,
}

/// Optional year/month restriction on dataset-mode slice enumeration.
#[derive(Debug, Clone, Copy)]
pub struct TimeFilter {
    pub year: i32,
    pub month: Option<u32>,
}

impl TimeFilter {
    fn matches(&self, time: &NaiveDateTime) -> bool {
        time.year() == self.year && self.month.map_or(true, |m| time.month() == m)
    }
}

/// One output dataset to be produced from a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSlice {
    /// 1-based band index into each subdataset of the source file
    pub band: u32,
    /// Dataset directory name, shared by all of its files
    pub prefix: String,
    /// Canonical `YYYYMMDDHHMMSS` time token, when the product is timed
    pub time: Option<String>,
}

/// Immutable conversion policy for one product.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductPolicy {
    pub time_mode: TimeMode,
    /// Source filename template, e.g. `LS_WATER_3577_{x}_{y}_{time}_v{}.nc`
    pub source_template: String,
    /// Dataset prefix template, e.g. `LS_WATER_3577_{x}_{y}_{time}`
    pub dest_template: String,
    /// Directory scanned by work-list generation
    #[serde(default)]
    pub src_dir: Option<PathBuf>,
    /// Destination bucket, e.g. `s3://dea-public-data-dev`
    pub bucket: String,
    /// Product directory under the bucket
    pub aws_dir: String,
    /// Remote suffix template; defaults depend on the time mode
    #[serde(default)]
    pub aws_dir_suffix_template: Option<String>,
    #[serde(default = "default_resampling")]
    pub default_resampling: String,
    /// Per-band overrides of the overview resampling method
    #[serde(default)]
    pub band_resampling: HashMap<String, String>,
    /// When set, only these bands are converted
    #[serde(default)]
    pub band_allow_list: Option<Vec<String>>,
    /// Bands never converted; checked before the allow list
    #[serde(default)]
    pub band_deny_list: Vec<String>,
    /// Bands written without overview pyramids
    #[serde(default)]
    pub no_pyramid_bands: HashSet<String>,
    #[serde(default)]
    pub band_failure_mode: BandFailureMode,
}

fn default_resampling() -> String {
    "average".to_string()
}

impl ProductPolicy {
    /// The remote suffix template in effect for this product.
    pub fn suffix_template(&self) -> &str {
        match &self.aws_dir_suffix_template {
            Some(t) => t,
            None => match self.time_mode {
                TimeMode::Notime => "x_{x}/y_{y}",
                _ => "x_{x}/y_{y}/{year}/{month}/{day}",
            },
        }
    }

    /// Format the remote directory suffix for one tile identity.
    ///
    /// Timed products take year/month/day from the first 8 characters of the
    /// time token (`YYYYMMDD`).
    pub fn resolve_remote_suffix(&self, identity: &TileIdentity) -> Result<String> {
        let mut suffix = self
            .suffix_template()
            .replace("{x}", &identity.x.to_string())
            .replace("{y}", &identity.y.to_string());

        if let Some(time) = identity.time.as_deref() {
            if time.len() < 8 {
                return Err(PipelineError::InvalidTimeMode(format!(
                    "time token {time:?} is too short for a YYYYMMDD date"
                )));
            }
            suffix = suffix
                .replace("{year}", &time[0..4])
                .replace("{month}", &time[4..6])
                .replace("{day}", &time[6..8]);
        }

        if suffix.contains('{') {
            return Err(PipelineError::InvalidTimeMode(format!(
                "suffix template {:?} needs a time component the identity lacks",
                self.suffix_template()
            )));
        }
        Ok(suffix)
    }

    /// Fully-qualified remote destination for one tile identity.
    pub fn resolve_destination(&self, identity: &TileIdentity) -> Result<String> {
        let suffix = self.resolve_remote_suffix(identity)?;
        Ok(format!("{}/{}/{}", self.bucket, self.aws_dir, suffix))
    }

    /// Whether a band survives the deny/allow filters.
    ///
    /// The deny list wins: a band on both lists is dropped.
    pub fn retain_band(&self, band: &str) -> bool {
        if self.band_deny_list.iter().any(|b| b == band) {
            return false;
        }
        match &self.band_allow_list {
            Some(allow) => allow.iter().any(|b| b == band),
            None => true,
        }
    }

    /// Overview resampling method for a band.
    pub fn resampling_for(&self, band: &str) -> &str {
        self.band_resampling
            .get(band)
            .map(String::as_str)
            .unwrap_or(&self.default_resampling)
    }

    /// Whether a band is written without overview pyramids.
    pub fn skip_pyramids(&self, band: &str) -> bool {
        self.no_pyramid_bands.contains(band)
    }

    /// Enumerate the output datasets for one source file.
    ///
    /// `times` is the source file's embedded time coordinate (used only in
    /// dataset mode); `filter` restricts dataset-mode slices to a year or
    /// year/month.
    pub fn dataset_slices(
        &self,
        identity: &TileIdentity,
        times: &[NaiveDateTime],
        filter: Option<&TimeFilter>,
    ) -> Result<Vec<DatasetSlice>> {
        match self.time_mode {
            TimeMode::Notime => Ok(vec![DatasetSlice {
                band: 1,
                prefix: self.format_prefix(identity, None)?,
                time: None,
            }]),
            TimeMode::Filename => {
                let time = identity.time.clone().ok_or_else(|| {
                    PipelineError::InvalidTimeMode(format!(
                        "product template {:?} carries no time token",
                        self.source_template
                    ))
                })?;
                Ok(vec![DatasetSlice {
                    band: 1,
                    prefix: self.format_prefix(identity, Some(&time))?,
                    time: Some(time),
                }])
            }
            TimeMode::Dataset => {
                let mut slices = Vec::new();
                for (index, time) in times.iter().enumerate() {
                    if let Some(filter) = filter {
                        if !filter.matches(time) {
                            continue;
                        }
                    }
                    let token = time.format("%Y%m%d%H%M%S").to_string();
                    slices.push(DatasetSlice {
                        band: index as u32 + 1,
                        prefix: self.format_prefix(identity, Some(&token))?,
                        time: Some(token),
                    });
                }
                Ok(slices)
            }
        }
    }

    fn format_prefix(&self, identity: &TileIdentity, time: Option<&str>) -> Result<String> {
        let mut prefix = self
            .dest_template
            .replace("{x}", &identity.x.to_string())
            .replace("{y}", &identity.y.to_string());
        if let Some(time) = time {
            prefix = prefix.replace("{time}", time);
        }
        if prefix.contains('{') {
            return Err(PipelineError::InvalidTimeMode(format!(
                "dest template {:?} needs a time component the identity lacks",
                self.dest_template
            )));
        }
        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn policy(time_mode: TimeMode) -> ProductPolicy {
        ProductPolicy {
            time_mode,
            source_template: "LS_WATER_3577_{x}_{y}_{time}_v{}.nc".to_string(),
            dest_template: "LS_WATER_3577_{x}_{y}_{time}".to_string(),
            src_dir: None,
            bucket: "s3://dea-public-data-dev".to_string(),
            aws_dir: "WOfS/WOFLs/v2.1.0/combined".to_string(),
            aws_dir_suffix_template: None,
            default_resampling: "mode".to_string(),
            band_resampling: HashMap::new(),
            band_allow_list: None,
            band_deny_list: Vec::new(),
            no_pyramid_bands: HashSet::new(),
            band_failure_mode: BandFailureMode::default(),
        }
    }

    fn identity(x: i64, y: i64, time: Option<&str>) -> TileIdentity {
        TileIdentity {
            x,
            y,
            time: time.map(|t| t.to_string()),
        }
    }

    #[test]
    fn test_remote_suffix_timed() {
        let policy = ProductPolicy {
            aws_dir_suffix_template: Some("x_{x}/y_{y}/{year}/{month}/{day}".to_string()),
            ..policy(TimeMode::Filename)
        };
        let suffix = policy
            .resolve_remote_suffix(&identity(3, -40, Some("20180102030405")))
            .unwrap();
        assert_eq!(suffix, "x_3/y_-40/2018/01/02");
    }

    #[test]
    fn test_remote_suffix_flat() {
        let suffix = policy(TimeMode::Notime)
            .resolve_remote_suffix(&identity(9, -39, None))
            .unwrap();
        assert_eq!(suffix, "x_9/y_-39");
    }

    #[test]
    fn test_missing_time_is_invalid() {
        let err = policy(TimeMode::Filename).resolve_remote_suffix(&identity(3, -40, None));
        assert!(matches!(err, Err(PipelineError::InvalidTimeMode(_))));
    }

    #[test]
    fn test_short_time_token_is_invalid() {
        let err = policy(TimeMode::Filename).resolve_remote_suffix(&identity(3, -40, Some("2018")));
        assert!(matches!(err, Err(PipelineError::InvalidTimeMode(_))));
    }

    #[test]
    fn test_destination_joins_bucket_and_dir() {
        let dest = policy(TimeMode::Filename)
            .resolve_destination(&identity(3, -40, Some("20180102030405")))
            .unwrap();
        assert_eq!(
            dest,
            "s3://dea-public-data-dev/WOfS/WOFLs/v2.1.0/combined/x_3/y_-40/2018/01/02"
        );
    }

    #[test]
    fn test_deny_list_beats_allow_list() {
        let policy = ProductPolicy {
            band_allow_list: Some(vec!["water".to_string()]),
            band_deny_list: vec!["water".to_string()],
            ..policy(TimeMode::Notime)
        };
        assert!(!policy.retain_band("water"));
    }

    #[test]
    fn test_allow_list_filters_unlisted_bands() {
        let policy = ProductPolicy {
            band_allow_list: Some(vec!["water".to_string()]),
            ..policy(TimeMode::Notime)
        };
        assert!(policy.retain_band("water"));
        assert!(!policy.retain_band("crs"));
    }

    #[test]
    fn test_resampling_override() {
        let policy = ProductPolicy {
            band_resampling: HashMap::from([("water".to_string(), "nearest".to_string())]),
            ..policy(TimeMode::Notime)
        };
        assert_eq!(policy.resampling_for("water"), "nearest");
        assert_eq!(policy.resampling_for("bs"), "mode");
    }

    #[test]
    fn test_notime_single_prefix() {
        let policy = ProductPolicy {
            dest_template: "tile_{x}_{y}".to_string(),
            ..policy(TimeMode::Notime)
        };
        let slices = policy
            .dataset_slices(&identity(9, -39, None), &[], None)
            .unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].prefix, "tile_9_-39");
        assert_eq!(slices[0].band, 1);
    }

    #[test]
    fn test_filename_mode_reuses_token() {
        let slices = policy(TimeMode::Filename)
            .dataset_slices(&identity(9, -39, Some("20180506102018")), &[], None)
            .unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].prefix, "LS_WATER_3577_9_-39_20180506102018");
    }

    #[test]
    fn test_dataset_mode_enumerates_times() {
        let times = vec![
            NaiveDate::from_ymd_opt(2018, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
            NaiveDate::from_ymd_opt(2019, 6, 7)
                .unwrap()
                .and_hms_opt(8, 9, 10)
                .unwrap(),
        ];
        let slices = policy(TimeMode::Dataset)
            .dataset_slices(&identity(9, -39, Some("ignored1234")), &times, None)
            .unwrap();

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].band, 1);
        assert_eq!(slices[0].prefix, "LS_WATER_3577_9_-39_20180102030405");
        assert_eq!(slices[1].band, 2);
        assert_eq!(slices[1].prefix, "LS_WATER_3577_9_-39_20190607080910");
    }

    #[test]
    fn test_dataset_mode_year_month_filter() {
        let times = vec![
            NaiveDate::from_ymd_opt(2018, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            NaiveDate::from_ymd_opt(2018, 3, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            NaiveDate::from_ymd_opt(2019, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        ];
        let filter = TimeFilter {
            year: 2018,
            month: Some(3),
        };
        let slices = policy(TimeMode::Dataset)
            .dataset_slices(&identity(9, -39, None), &times, Some(&filter))
            .unwrap();

        // Band index still refers to the slice's position in the source file.
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].band, 2);
        assert_eq!(slices[0].prefix, "LS_WATER_3577_9_-39_20180302000000");
    }
}
