//! Per-run manifest written into the work area before any stage executes.
//!
//! The manifest is an audit trail of what a run was asked to do. It is not
//! a checkpoint and nothing resumes from it.

use crate::atomic::{atomic_read_json, atomic_write_json};
use crate::config::{LayoutConfig, StageConfig};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings recorded for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub max_keypoints: u32,
    pub matching: String,
    pub features: String,
    pub pairing: String,
}

impl RunSettings {
    pub fn with_max_keypoints(max_keypoints: u32) -> Self {
        Self {
            max_keypoints,
            ..Self::default()
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_keypoints: StageConfig::DEFAULT_MAX_KEYPOINTS,
            matching: StageConfig::MATCHING_NAME.to_string(),
            features: StageConfig::FEATURES_NAME.to_string(),
            pairing: StageConfig::PAIRING_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub project_dir: PathBuf,
    pub images_dir: PathBuf,
    pub output_root: PathBuf,
    pub work_dir: PathBuf,
    pub settings: RunSettings,
}

impl RunManifest {
    pub fn path_in(work_dir: &Path) -> PathBuf {
        work_dir.join(LayoutConfig::MANIFEST_FILENAME)
    }

    /// Write the manifest to `<work_dir>/run_manifest.json`.
    pub fn write(&self) -> Result<PathBuf> {
        let path = Self::path_in(&self.work_dir);
        atomic_write_json(&path, self)?;
        Ok(path)
    }

    pub fn load(work_dir: &Path) -> Result<Option<Self>> {
        atomic_read_json(&Self::path_in(work_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_json_shape() {
        let manifest = RunManifest {
            project_dir: "/p".into(),
            images_dir: "/p/images".into(),
            output_root: "/o".into(),
            work_dir: "/o/hloc_work".into(),
            settings: RunSettings::default(),
        };
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["settings"]["max_keypoints"], 4096);
        assert_eq!(value["settings"]["matching"], "lightglue");
        assert_eq!(value["settings"]["features"], "superpoint");
        assert_eq!(value["settings"]["pairing"], "exhaustive");
        assert_eq!(value["work_dir"], "/o/hloc_work");
    }

    #[test]
    fn test_write_and_load() {
        let temp = TempDir::new().unwrap();
        let work_dir = temp.path().join("hloc_work");
        let manifest = RunManifest {
            project_dir: temp.path().into(),
            images_dir: temp.path().join("images"),
            output_root: temp.path().into(),
            work_dir: work_dir.clone(),
            settings: RunSettings::with_max_keypoints(2048),
        };

        let path = manifest.write().unwrap();
        assert!(path.ends_with("run_manifest.json"));
        assert_eq!(RunManifest::load(&work_dir).unwrap(), Some(manifest));
    }
}
