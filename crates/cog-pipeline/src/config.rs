//! Product configuration loading.
//!
//! The products file is a YAML mapping from product name to
//! [`ProductPolicy`](crate::policy::ProductPolicy). A built-in default set
//! covers the standard continental products when no file is supplied.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::policy::ProductPolicy;

/// Built-in product policies, used when no configuration file is given.
const DEFAULT_PRODUCTS: &str = r#"
products:
    wofs_albers:
        time_mode: dataset
        source_template: LS_WATER_3577_{x}_{y}_{time}_v{}.nc
        dest_template: LS_WATER_3577_{x}_{y}_{time}
        src_dir: /g/data/fk4/datacube/002/WOfS/WOfS_25_2_1/netcdf
        bucket: s3://dea-public-data-dev
        aws_dir: WOfS/WOFLs/v2.1.0/combined
        default_resampling: mode
        band_deny_list: [dataset, crs]
    wofs_filtered_summary:
        time_mode: notime
        source_template: wofs_filtered_summary_{x}_{y}.nc
        dest_template: wofs_filtered_summary_{x}_{y}
        src_dir: /g/data2/fk4/datacube/002/WOfS/WOfS_Filt_Stats_25_2_1/netcdf
        bucket: s3://dea-public-data-dev
        aws_dir: WOfS/filtered_summary/v2.1.0/combined
        default_resampling: mode
        band_deny_list: [dataset, crs]
    ls5_fc_albers:
        time_mode: dataset
        source_template: LS5_TM_FC_3577_{x}_{y}_{time}_v{}.nc
        dest_template: LS5_TM_FC_3577_{x}_{y}_{time}
        src_dir: /g/data/fk4/datacube/002/FC/LS5_TM_FC
        bucket: s3://dea-public-data-dev
        aws_dir: fractional-cover/fc/v2.2.0/ls5
        default_resampling: average
        band_deny_list: [dataset, crs]
    ls7_fc_albers:
        time_mode: dataset
        source_template: LS7_ETM_FC_3577_{x}_{y}_{time}_v{}.nc
        dest_template: LS7_ETM_FC_3577_{x}_{y}_{time}
        src_dir: /g/data/fk4/datacube/002/FC/LS7_ETM_FC
        bucket: s3://dea-public-data-dev
        aws_dir: fractional-cover/fc/v2.2.0/ls7
        default_resampling: average
        band_deny_list: [dataset, crs]
    ls8_fc_albers:
        time_mode: dataset
        source_template: LS8_OLI_FC_3577_{x}_{y}_{time}_v{}.nc
        dest_template: LS8_OLI_FC_3577_{x}_{y}_{time}
        src_dir: /g/data/fk4/datacube/002/FC/LS8_OLI_FC
        bucket: s3://dea-public-data-dev
        aws_dir: fractional-cover/fc/v2.2.0/ls8
        default_resampling: average
        band_deny_list: [dataset, crs]
"#;

/// The full product configuration: one policy per product name.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSet {
    pub products: HashMap<String, ProductPolicy>,
}

impl ProductSet {
    /// Parse a products document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: ProductSet = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        debug!(count = set.products.len(), "Parsed product configuration");
        Ok(set)
    }

    /// Load a products file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_yaml(&content)?;
        info!(path = %path.display(), count = set.products.len(), "Loaded product configuration");
        Ok(set)
    }

    /// The built-in default product set.
    pub fn builtin() -> Self {
        Self::from_yaml(DEFAULT_PRODUCTS).expect("built-in product configuration parses")
    }

    /// Load from a file when given, otherwise fall back to the defaults.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Look up one product's policy.
    pub fn get(&self, product: &str) -> Result<&ProductPolicy> {
        self.products.get(product).ok_or_else(|| {
            PipelineError::InvalidConfig(format!("unknown product {product:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TimeMode;

    #[test]
    fn test_builtin_products_parse() {
        let set = ProductSet::builtin();
        assert!(set.products.len() >= 5);

        let wofs = set.get("wofs_albers").unwrap();
        assert_eq!(wofs.time_mode, TimeMode::Dataset);
        assert_eq!(wofs.default_resampling, "mode");
        assert!(!wofs.retain_band("dataset"));

        let summary = set.get("wofs_filtered_summary").unwrap();
        assert_eq!(summary.time_mode, TimeMode::Notime);
    }

    #[test]
    fn test_unknown_product_is_an_error() {
        let set = ProductSet::builtin();
        assert!(matches!(
            set.get("nonexistent"),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_optional_fields_default() {
        let set = ProductSet::from_yaml(
            r#"
products:
    minimal:
        time_mode: notime
        source_template: tile_{x}_{y}.nc
        dest_template: tile_{x}_{y}
        bucket: s3://bucket
        aws_dir: some/dir
"#,
        )
        .unwrap();

        let policy = set.get("minimal").unwrap();
        assert_eq!(policy.default_resampling, "average");
        assert!(policy.band_deny_list.is_empty());
        assert!(policy.band_allow_list.is_none());
        assert!(policy.retain_band("anything"));
    }
}
