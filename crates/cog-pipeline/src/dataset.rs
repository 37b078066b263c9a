//! Dataset directory lifecycle.
//!
//! A converted dataset is a directory of band COGs plus one metadata
//! document, and its state is where it sits under the output root:
//! `WORKING/` while the converter fills it, `TO_UPLOAD/` once staged, then
//! `COMPLETE/` or `FAILED/` (or deletion) after the watcher's attempt.
//! Transitions are same-filesystem directory renames.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Marker file recording a staged dataset's remote destination.
pub const UPLOAD_DESTINATION_FILE: &str = "upload-destination.txt";

/// Lifecycle state of a dataset directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetState {
    /// Conversion in progress; contents mutable
    Working,
    /// Conversion finished; awaiting transfer
    ToUpload,
    /// Transfer succeeded and the dataset was retained
    Complete,
    /// Transfer (or the follow-up move) failed
    Failed,
}

impl DatasetState {
    /// Directory name partitioning datasets of this state.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetState::Working => "WORKING",
            DatasetState::ToUpload => "TO_UPLOAD",
            DatasetState::Complete => "COMPLETE",
            DatasetState::Failed => "FAILED",
        }
    }
}

/// The output root and its per-state subdirectories.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding datasets in the given state.
    pub fn state_dir(&self, state: DatasetState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    /// A dataset's directory in the given state.
    pub fn dataset_dir(&self, state: DatasetState, prefix: &str) -> PathBuf {
        self.state_dir(state).join(prefix)
    }

    /// Create the state directories.
    pub fn ensure(&self, states: &[DatasetState]) -> Result<()> {
        for state in states {
            fs::create_dir_all(self.state_dir(*state))?;
        }
        Ok(())
    }

    /// Move a dataset between states via an atomic same-filesystem rename.
    pub fn promote(&self, prefix: &str, from: DatasetState, to: DatasetState) -> Result<PathBuf> {
        let source = self.dataset_dir(from, prefix);
        let target = self.dataset_dir(to, prefix);
        fs::rename(&source, &target)?;
        Ok(target)
    }

    /// Delete a dataset directory recursively.
    pub fn discard(&self, prefix: &str, state: DatasetState) -> Result<()> {
        fs::remove_dir_all(self.dataset_dir(state, prefix))?;
        Ok(())
    }

    /// List dataset prefixes currently in the given state, sorted.
    pub fn list(&self, state: DatasetState) -> Result<Vec<String>> {
        let dir = self.state_dir(state);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut prefixes = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                prefixes.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        prefixes.sort();
        Ok(prefixes)
    }
}

/// Write the upload destination marker into a dataset directory.
///
/// Written once at WORKING→TO_UPLOAD time; never rewritten.
pub fn write_upload_destination(dataset_dir: &Path, destination: &str) -> Result<()> {
    fs::write(
        dataset_dir.join(UPLOAD_DESTINATION_FILE),
        format!("{destination}\n"),
    )?;
    Ok(())
}

/// Read a dataset's upload destination marker, if present.
///
/// Only the first line counts; the value is used verbatim.
pub fn read_upload_destination(dataset_dir: &Path) -> Result<Option<String>> {
    let path = dataset_dir.join(UPLOAD_DESTINATION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(content.lines().next().map(|l| l.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout
            .ensure(&[DatasetState::Working, DatasetState::ToUpload])
            .unwrap();

        assert!(tmp.path().join("WORKING").is_dir());
        assert!(tmp.path().join("TO_UPLOAD").is_dir());
        assert!(!tmp.path().join("COMPLETE").exists());
    }

    #[test]
    fn test_promote_renames_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout
            .ensure(&[DatasetState::Working, DatasetState::ToUpload])
            .unwrap();

        let working = layout.dataset_dir(DatasetState::Working, "tile_9_-39");
        fs::create_dir(&working).unwrap();
        fs::write(working.join("tile_9_-39_water.tif"), b"tif").unwrap();

        let target = layout
            .promote("tile_9_-39", DatasetState::Working, DatasetState::ToUpload)
            .unwrap();

        assert!(!working.exists());
        assert!(target.join("tile_9_-39_water.tif").exists());
        assert_eq!(layout.list(DatasetState::ToUpload).unwrap(), vec!["tile_9_-39"]);
        assert!(layout.list(DatasetState::Working).unwrap().is_empty());
    }

    #[test]
    fn test_promote_missing_dataset_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout
            .ensure(&[DatasetState::Working, DatasetState::ToUpload])
            .unwrap();

        let err = layout.promote("absent", DatasetState::Working, DatasetState::ToUpload);
        assert!(err.is_err());
    }

    #[test]
    fn test_upload_destination_round_trip() {
        let tmp = tempfile::tempdir().unwrap();

        assert_eq!(read_upload_destination(tmp.path()).unwrap(), None);

        write_upload_destination(tmp.path(), "s3://bucket/product/x_9/y_-39").unwrap();
        assert_eq!(
            read_upload_destination(tmp.path()).unwrap().as_deref(),
            Some("s3://bucket/product/x_9/y_-39")
        );
    }

    #[test]
    fn test_list_ignores_files() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout.ensure(&[DatasetState::ToUpload]).unwrap();

        fs::write(layout.state_dir(DatasetState::ToUpload).join("stray.txt"), b"x").unwrap();
        fs::create_dir(layout.dataset_dir(DatasetState::ToUpload, "ds")).unwrap();

        assert_eq!(layout.list(DatasetState::ToUpload).unwrap(), vec!["ds"]);
    }
}
