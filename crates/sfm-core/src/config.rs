//! Centralized configuration for sfm-core.
//!
//! Fixed names of the on-disk layout, locator heuristics and stage presets,
//! plus the small set of values a caller may tune per run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

/// Names of the work area and the final COLMAP-style output tree.
pub struct LayoutConfig;

impl LayoutConfig {
    pub const WORK_DIR_NAME: &'static str = "hloc_work";
    pub const RECONSTRUCTION_DIR_NAME: &'static str = "sfm";
    pub const MANIFEST_FILENAME: &'static str = "run_manifest.json";
    pub const IMAGE_LIST_FILENAME: &'static str = "images.txt";
    pub const PAIRS_FILENAME: &'static str = "pairs-exhaustive.txt";
    pub const DATABASE_FILENAME: &'static str = "database.db";
    pub const SPARSE_DIR_NAME: &'static str = "sparse";
    pub const SPARSE_MODEL_DIR_NAME: &'static str = "0";
    pub const IMAGES_DIR_NAME: &'static str = "images";

    pub fn work_dir(output_root: &Path) -> PathBuf {
        output_root.join(Self::WORK_DIR_NAME)
    }

    pub fn reconstruction_dir(work_dir: &Path) -> PathBuf {
        work_dir.join(Self::RECONSTRUCTION_DIR_NAME)
    }

    pub fn sparse_model_dir(output_root: &Path) -> PathBuf {
        output_root
            .join(Self::SPARSE_DIR_NAME)
            .join(Self::SPARSE_MODEL_DIR_NAME)
    }
}

/// Recognized input images.
pub struct ImageConfig;

impl ImageConfig {
    /// Lower-case extension allow-list; matching is case-insensitive.
    pub const EXTENSIONS: &'static [&'static str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

    pub fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                Self::EXTENSIONS.contains(&e.as_str())
            })
            .unwrap_or(false)
    }
}

/// Heuristics used to find files a stage wrote under a name we did not pick.
pub struct LocatorConfig;

impl LocatorConfig {
    pub const ARTIFACT_EXTENSION: &'static str = "h5";
    pub const MATCH_KEYWORD: &'static str = "match";
    pub const MATCH_GLOB: &'static str = "matches*.h5";
    pub const FEATURE_GLOB: &'static str = "feats-*.h5";
    /// Backward tolerance applied to the invocation start when filtering
    /// match files by modification time.
    pub const MATCH_TIME_TOLERANCE: Duration = Duration::from_secs(1);
}

/// Stage presets and the built-in configurations used when a preset is absent.
pub struct StageConfig;

impl StageConfig {
    pub const DEFAULT_MAX_KEYPOINTS: u32 = 4096;
    pub const FEATURE_PRESET: &'static str = "superpoint_aachen";
    pub const MATCHER_PRESET: &'static str = "lightglue";
    pub const FEATURE_OUTPUT: &'static str = "feats-superpoint";
    pub const MATCHER_OUTPUT: &'static str = "matches-superpoint-lightglue";

    pub const FEATURES_NAME: &'static str = "superpoint";
    pub const MATCHING_NAME: &'static str = "lightglue";
    pub const PAIRING_NAME: &'static str = "exhaustive";

    pub fn default_feature_conf(max_keypoints: u32) -> Value {
        json!({
            "output": Self::FEATURE_OUTPUT,
            "model": {"name": "superpoint", "nms_radius": 3, "max_keypoints": max_keypoints},
            "preprocessing": {"grayscale": true, "resize_max": 1024},
        })
    }

    pub fn default_matcher_conf() -> Value {
        json!({
            "output": Self::MATCHER_OUTPUT,
            "model": {"name": "lightglue", "features": "superpoint"},
        })
    }
}

/// Python bridge defaults.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const DEFAULT_PYTHON: &'static str = "python3";
    pub const SCRIPT_FILENAME: &'static str = "stage_bridge.py";
    pub const DIR_NAME: &'static str = "sfm-colmap";
    pub const ENTRY_FUNCTION: &'static str = "main";
    /// Exit status the bridge uses when the call raised `TypeError`.
    pub const ARGUMENT_MISMATCH_EXIT: i32 = 3;

    pub const PAIRING_MODULE: &'static str = "hloc.pairs_from_exhaustive";
    pub const EXTRACTION_MODULE: &'static str = "hloc.extract_features";
    pub const MATCHING_MODULE: &'static str = "hloc.match_features";
    pub const RECONSTRUCTION_MODULE: &'static str = "hloc.reconstruction";

    /// Default deployment directory for the bridge script.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::DIR_NAME)
            .join("bridge")
    }
}

/// Per-run tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub max_keypoints: u32,
    pub match_time_tolerance: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_keypoints: StageConfig::DEFAULT_MAX_KEYPOINTS,
            match_time_tolerance: LocatorConfig::MATCH_TIME_TOLERANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extensions_case_insensitive() {
        assert!(ImageConfig::is_image(Path::new("a/IMG_0001.JPG")));
        assert!(ImageConfig::is_image(Path::new("b.tiff")));
        assert!(!ImageConfig::is_image(Path::new("notes.txt")));
        assert!(!ImageConfig::is_image(Path::new("jpg")));
    }

    #[test]
    fn test_layout_paths() {
        let root = Path::new("/out");
        assert_eq!(LayoutConfig::work_dir(root), Path::new("/out/hloc_work"));
        assert_eq!(
            LayoutConfig::sparse_model_dir(root),
            Path::new("/out/sparse/0")
        );
    }

    #[test]
    fn test_default_feature_conf_carries_keypoints() {
        let conf = StageConfig::default_feature_conf(1024);
        assert_eq!(conf["model"]["max_keypoints"], 1024);
        assert_eq!(conf["output"], "feats-superpoint");
    }

    #[test]
    fn test_default_options() {
        let opts = PipelineOptions::default();
        assert_eq!(opts.max_keypoints, 4096);
        assert_eq!(opts.match_time_tolerance, Duration::from_secs(1));
    }
}
