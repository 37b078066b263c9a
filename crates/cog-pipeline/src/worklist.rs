//! Work-list generation.
//!
//! Enumerates a product's candidate input files by walking its source
//! directory and keeping the filenames that match the product template.
//! This is the filesystem stand-in for a catalog query; the output pipes
//! straight into the conversion scheduler.

use std::path::PathBuf;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::identity::TileTemplate;
use crate::policy::{ProductPolicy, TimeFilter};

/// List a product's input files, sorted and de-duplicated.
///
/// `filter` restricts results by the filename time token when the template
/// carries one; files without a usable token are kept, since their time
/// slices can only be filtered during conversion.
pub fn generate_work_list(
    policy: &ProductPolicy,
    filter: Option<&TimeFilter>,
) -> Result<Vec<PathBuf>> {
    let src_dir = policy.src_dir.as_ref().ok_or_else(|| {
        PipelineError::InvalidConfig("product has no src_dir to scan".to_string())
    })?;
    let template = TileTemplate::compile(&policy.source_template)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(src_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        match template.resolve(entry.path()) {
            Ok(identity) => {
                if let Some(filter) = filter {
                    if !time_token_matches(identity.time.as_deref(), filter) {
                        continue;
                    }
                }
                files.push(entry.into_path());
            }
            Err(_) => continue,
        }
    }

    files.sort();
    files.dedup();
    info!(src_dir = %src_dir.display(), count = files.len(), "Generated work list");
    Ok(files)
}

/// Match a filename time token (`YYYYMM...`) against a year/month filter.
fn time_token_matches(time: Option<&str>, filter: &TimeFilter) -> bool {
    match time {
        Some(token) if token.len() >= 6 => {
            &token[0..4] == filter.year.to_string()
                && filter
                    .month
                    .map_or(true, |month| token[4..6] == format!("{month:02}"))
        }
        _ => true,
    }
}
