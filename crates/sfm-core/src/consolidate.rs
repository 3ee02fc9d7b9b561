//! Consolidation of a run's work area into the COLMAP-style output tree.
//!
//! ```text
//! <output_root>/database.db
//! <output_root>/sparse/0/*      flat, binary preferred over text per stem
//! ```
//!
//! [`move_with_dedup`] is the only way files enter the output tree. An
//! existing destination of equal size is kept and the source discarded; one
//! of different size is replaced. Re-running consolidation is therefore a
//! no-op once the tree is complete.
//!
//! Missing inputs (no database, no model directory) are warnings, never
//! errors: the run completes with a partial tree.

use crate::config::LayoutConfig;
use crate::error::IoResultExt;
use crate::locator::{newest, FileCandidate};
use crate::{Result, SfmError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What [`move_with_dedup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Destination did not exist; the source was relocated.
    Moved,
    /// Destination already held a file of the same size; the source was deleted.
    DuplicateDropped,
    /// Destination held a file of a different size; it was replaced.
    Replaced,
}

/// Move `src` to `dst`, deduplicating by size against an existing `dst`.
pub fn move_with_dedup(src: &Path, dst: &Path) -> Result<MoveOutcome> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    let mut outcome = MoveOutcome::Moved;
    if dst.exists() {
        if same_size(src, dst) {
            fs::remove_file(src).map_err(|e| SfmError::io("removing duplicate source", src, e))?;
            debug!("Dropped duplicate {} (kept {})", src.display(), dst.display());
            return Ok(MoveOutcome::DuplicateDropped);
        }
        fs::remove_file(dst).map_err(|e| SfmError::io("removing stale destination", dst, e))?;
        outcome = MoveOutcome::Replaced;
    }

    relocate_file(src, dst)?;
    Ok(outcome)
}

fn same_size(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.len() == b.len(),
        _ => false,
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn relocate_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|e| SfmError::io("copying file", src, e))?;
    fs::remove_file(src).map_err(|e| SfmError::io("removing source after copy", src, e))?;
    Ok(())
}

/// File sets that identify a complete sparse model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Binary,
    /// Binary model written by newer COLMAP releases (`frames.bin`).
    BinaryFrames,
    Text,
}

impl ModelFormat {
    const SIGNATURES: [(ModelFormat, [&'static str; 3]); 3] = [
        (ModelFormat::Binary, ["cameras.bin", "images.bin", "points3d.bin"]),
        (ModelFormat::BinaryFrames, ["cameras.bin", "frames.bin", "points3d.bin"]),
        (ModelFormat::Text, ["cameras.txt", "images.txt", "points3d.txt"]),
    ];

    /// Detect the model format of `dir` from its entry names (case-insensitive).
    pub fn detect(dir: &Path) -> Option<ModelFormat> {
        let names: HashSet<String> = fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_lowercase())
            .collect();

        Self::SIGNATURES
            .iter()
            .find(|(_, required)| required.iter().all(|n| names.contains(*n)))
            .map(|(format, _)| *format)
    }
}

/// Find the model directory under `root` closest to it.
///
/// Descendants are preferred over `root` itself; among descendants the one
/// with the fewest path components wins, ties broken by path.
pub fn locate_model_dir(root: &Path) -> Option<PathBuf> {
    let best = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .filter(|p| ModelFormat::detect(p).is_some())
        .min_by(|a, b| {
            a.components()
                .count()
                .cmp(&b.components().count())
                .then_with(|| a.cmp(b))
        });

    best.or_else(|| ModelFormat::detect(root).map(|_| root.to_path_buf()))
}

/// Move the newest `database.db` found anywhere under `work_dir` to the output root.
pub fn relocate_database(work_dir: &Path, output_root: &Path) -> Result<Option<PathBuf>> {
    let newest_db = newest(
        WalkDir::new(work_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.file_name() == LayoutConfig::DATABASE_FILENAME
            })
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some(FileCandidate {
                    path: e.into_path(),
                    modified,
                })
            }),
    );

    let Some(db) = newest_db else {
        return Ok(None);
    };
    let dst = output_root.join(LayoutConfig::DATABASE_FILENAME);
    move_with_dedup(&db.path, &dst)?;
    info!("[COLMAP] database.db -> {}", dst.display());
    Ok(Some(dst))
}

/// Counts from a flat relocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveCounts {
    pub moved: usize,
    pub duplicates_dropped: usize,
    pub replaced: usize,
}

impl MoveCounts {
    fn record(&mut self, outcome: MoveOutcome) {
        match outcome {
            MoveOutcome::Moved => self.moved += 1,
            MoveOutcome::DuplicateDropped => self.duplicates_dropped += 1,
            MoveOutcome::Replaced => self.replaced += 1,
        }
    }
}

/// Move every file under `src_dir` (recursively) directly into `dest_dir`,
/// keeping only the file name.
pub fn flatten_into(src_dir: &Path, dest_dir: &Path) -> Result<MoveCounts> {
    fs::create_dir_all(dest_dir).with_path(dest_dir)?;

    let files: Vec<PathBuf> = WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let mut counts = MoveCounts::default();
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        counts.record(move_with_dedup(&file, &dest_dir.join(name))?);
    }
    Ok(counts)
}

/// Delete `<stem>.txt` wherever `<stem>.bin` exists in `dir`.
///
/// Returns the removed files; failures to remove are logged and skipped.
pub fn dedup_text_models(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();

    let binary_stems: HashSet<&std::ffi::OsStr> = files
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "bin"))
        .filter_map(|p| p.file_stem())
        .collect();

    let mut removed = Vec::new();
    for txt in files
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "txt"))
    {
        let Some(stem) = txt.file_stem() else {
            continue;
        };
        if !binary_stems.contains(stem) {
            continue;
        }
        match fs::remove_file(txt) {
            Ok(()) => {
                info!("[CLEAN] removed duplicate text file: {}", txt.display());
                removed.push(txt.clone());
            }
            Err(e) => warn!("Failed to remove {}: {}", txt.display(), e),
        }
    }
    removed
}

/// Outcome of [`consolidate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub database: Option<PathBuf>,
    /// Directory the sparse model was taken from.
    pub model_source: Option<PathBuf>,
    /// `sparse/0`, when a model was relocated.
    pub sparse_dir: Option<PathBuf>,
    pub model_files: MoveCounts,
    pub removed_text: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl ConsolidationReport {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Populate `<output_root>/database.db` and `<output_root>/sparse/0` from `work_dir`.
pub fn consolidate(work_dir: &Path, output_root: &Path) -> Result<ConsolidationReport> {
    let mut report = ConsolidationReport::default();

    report.database = relocate_database(work_dir, output_root)?;
    if report.database.is_none() {
        report.warn(format!(
            "No {} found under {}",
            LayoutConfig::DATABASE_FILENAME,
            work_dir.display()
        ));
    }

    let sfm_dir = LayoutConfig::reconstruction_dir(work_dir);
    let source = locate_model_dir(&sfm_dir).or_else(|| locate_model_dir(work_dir));
    let Some(source) = source else {
        report.warn(format!(
            "Could not find COLMAP sparse model under {}",
            sfm_dir.display()
        ));
        return Ok(report);
    };

    let sparse0 = LayoutConfig::sparse_model_dir(output_root);
    report.model_files = flatten_into(&source, &sparse0)?;
    report.removed_text = dedup_text_models(&sparse0);
    info!(
        "[COLMAP] sparse {} -> {} (cleaned duplicates)",
        source.display(),
        sparse0.display()
    );

    report.model_source = Some(source);
    report.sparse_dir = Some(sparse0);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn write_model(dir: &Path, ext: &str) {
        for name in ["cameras", "images", "points3D"] {
            write(&dir.join(format!("{}.{}", name, ext)), name.as_bytes());
        }
    }

    #[test]
    fn test_move_into_missing_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a/file.bin");
        let dst = temp.path().join("out/deep/file.bin");
        write(&src, b"1234");

        assert_eq!(move_with_dedup(&src, &dst).unwrap(), MoveOutcome::Moved);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"1234");
    }

    #[test]
    fn test_move_is_idempotent_for_same_content() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");

        write(&src, b"model");
        move_with_dedup(&src, &dst).unwrap();
        write(&src, b"model");
        assert_eq!(
            move_with_dedup(&src, &dst).unwrap(),
            MoveOutcome::DuplicateDropped
        );
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"model");
    }

    #[test]
    fn test_move_replaces_stale_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");
        write(&dst, b"old");
        write(&src, b"newer content");

        assert_eq!(move_with_dedup(&src, &dst).unwrap(), MoveOutcome::Replaced);
        assert_eq!(fs::read(&dst).unwrap(), b"newer content");
    }

    #[test]
    fn test_detect_model_formats() {
        let temp = TempDir::new().unwrap();
        write_model(&temp.path().join("bin"), "bin");
        write_model(&temp.path().join("txt"), "txt");
        for name in ["cameras.bin", "frames.bin", "points3D.bin"] {
            write(&temp.path().join("frames").join(name), b"x");
        }
        write(&temp.path().join("partial/cameras.bin"), b"x");

        assert_eq!(ModelFormat::detect(&temp.path().join("bin")), Some(ModelFormat::Binary));
        assert_eq!(ModelFormat::detect(&temp.path().join("txt")), Some(ModelFormat::Text));
        assert_eq!(
            ModelFormat::detect(&temp.path().join("frames")),
            Some(ModelFormat::BinaryFrames)
        );
        assert_eq!(ModelFormat::detect(&temp.path().join("partial")), None);
    }

    #[test]
    fn test_locate_prefers_shallowest_model() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("sfm");
        write_model(&root.join("a/b/c/d"), "bin");
        write_model(&root.join("x/y"), "bin");

        assert_eq!(locate_model_dir(&root), Some(root.join("x/y")));
    }

    #[test]
    fn test_locate_falls_back_to_root() {
        let temp = TempDir::new().unwrap();
        write_model(temp.path(), "bin");
        assert_eq!(locate_model_dir(temp.path()), Some(temp.path().to_path_buf()));

        let empty = TempDir::new().unwrap();
        assert_eq!(locate_model_dir(empty.path()), None);
    }

    #[test]
    fn test_dedup_removes_text_with_binary_sibling() {
        let temp = TempDir::new().unwrap();
        write_model(temp.path(), "bin");
        write_model(temp.path(), "txt");
        write(&temp.path().join("project.txt"), b"notes");

        let removed = dedup_text_models(temp.path());
        assert_eq!(removed.len(), 3);
        assert!(!temp.path().join("cameras.txt").exists());
        assert!(temp.path().join("cameras.bin").exists());
        assert!(temp.path().join("project.txt").exists());
    }

    #[test]
    fn test_consolidate_without_outputs_only_warns() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("hloc_work");
        fs::create_dir_all(work.join("sfm")).unwrap();

        let report = consolidate(&work, temp.path()).unwrap();
        assert!(report.database.is_none());
        assert!(report.sparse_dir.is_none());
        assert_eq!(report.warnings.len(), 2);
        assert!(!temp.path().join("sparse").exists());
    }

    #[test]
    fn test_consolidate_flattens_and_dedups() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();
        let work = out.join("hloc_work");
        write(&work.join("sfm/database.db"), b"sqlite");
        write_model(&work.join("sfm/models/0"), "bin");
        write_model(&work.join("sfm/models/0"), "txt");
        write(&work.join("sfm/models/0/extra/rigs.bin"), b"r");

        let report = consolidate(&work, out).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.database, Some(out.join("database.db")));
        assert_eq!(report.model_source, Some(work.join("sfm/models/0")));

        let sparse0 = out.join("sparse/0");
        let mut names: Vec<String> = fs::read_dir(&sparse0)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["cameras.bin", "images.bin", "points3D.bin", "rigs.bin"]
        );

        // A second pass over the now-empty work area changes nothing.
        let again = consolidate(&work, out).unwrap();
        assert!(again.database.is_none());
        assert_eq!(fs::read_dir(&sparse0).unwrap().count(), 4);
    }
}
