//! Atomic JSON persistence for the run manifest.
//!
//! Writes go to a sibling temp file named after the process id, are synced,
//! then renamed over the target so a crash never leaves a half-written
//! manifest behind.

use crate::error::IoResultExt;
use crate::{Result, SfmError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Read and parse a JSON file. Returns `None` if the file doesn't exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_path(path)?;
    let data = serde_json::from_str(&contents).map_err(|e| SfmError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created as needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    let serialized = serde_json::to_string_pretty(data)?;
    let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_path(&temp_path)?;
        file.write_all(serialized.as_bytes()).with_path(&temp_path)?;
        file.sync_all().with_path(&temp_path)?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        fs::remove_file(&temp_path).ok();
        return Err(SfmError::io("replacing JSON file", path, e));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: i32,
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest.json");
        let data = Sample {
            name: "proj".into(),
            value: 7,
        };

        atomic_write_json(&path, &data).unwrap();
        let read: Option<Sample> = atomic_read_json(&path).unwrap();
        assert_eq!(read, Some(data));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest.json");
        atomic_write_json(&path, &Sample { name: "a".into(), value: 1 }).unwrap();
        atomic_write_json(&path, &Sample { name: "b".into(), value: 2 }).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        let read: Sample = atomic_read_json(&path).unwrap().unwrap();
        assert_eq!(read.value, 2);
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let read: Option<Sample> = atomic_read_json(&temp.path().join("nope.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_read_invalid_json_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let read: Result<Option<Sample>> = atomic_read_json(&path);
        assert!(matches!(read, Err(SfmError::Json { .. })));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("m.json");
        atomic_write_json(&path, &Sample { name: "n".into(), value: 0 }).unwrap();
        assert!(path.exists());
    }
}
