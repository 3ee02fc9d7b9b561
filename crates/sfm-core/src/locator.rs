//! Discovery of files a stage wrote under a name the caller did not choose.
//!
//! Stage libraries sometimes export under their own default names. The
//! requested name is trusted first; after that the search falls back to
//! keyword + modification-time filtering, then to a generic glob, then to
//! the parent directory.
//!
//! "Most recent wins" is decided by [`compare_recency`]: modification time
//! first, path second, so equal timestamps still resolve deterministically.
//! This ordering assumes stages never run concurrently against the same
//! export directory.

use crate::config::LocatorConfig;
use crate::{Result, SfmError};
use globset::{Glob, GlobMatcher};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A file together with the modification time used to rank it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl FileCandidate {
    fn from_path(path: PathBuf) -> Option<Self> {
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        Some(Self { path, modified })
    }
}

/// Orders candidates from oldest to newest; ties are broken by path.
pub fn compare_recency(a: &FileCandidate, b: &FileCandidate) -> Ordering {
    a.modified
        .cmp(&b.modified)
        .then_with(|| a.path.cmp(&b.path))
}

/// The most recent candidate, if any.
pub fn newest(candidates: impl IntoIterator<Item = FileCandidate>) -> Option<FileCandidate> {
    candidates.into_iter().max_by(compare_recency)
}

/// Which search step produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStrategy {
    ExactName,
    RecentKeyword,
    Glob,
    ParentGlob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    pub path: PathBuf,
    pub strategy: LocateStrategy,
}

/// Hints for locating one exported artifact.
#[derive(Debug, Clone)]
pub struct ArtifactQuery<'a> {
    pub what: &'a str,
    pub export_dir: &'a Path,
    /// Requested basename without extension.
    pub requested_stem: &'a str,
    pub extension: &'a str,
    pub keyword: &'a str,
    pub glob: &'a str,
    /// Start of the stage invocation.
    pub not_before: SystemTime,
    pub tolerance: Duration,
}

impl<'a> ArtifactQuery<'a> {
    /// Query for the match store written by the matching stage.
    pub fn matches(export_dir: &'a Path, requested_stem: &'a str, not_before: SystemTime) -> Self {
        Self {
            what: "matches file",
            export_dir,
            requested_stem,
            extension: LocatorConfig::ARTIFACT_EXTENSION,
            keyword: LocatorConfig::MATCH_KEYWORD,
            glob: LocatorConfig::MATCH_GLOB,
            not_before,
            tolerance: LocatorConfig::MATCH_TIME_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn window_start(&self) -> SystemTime {
        self.not_before
            .checked_sub(self.tolerance)
            .unwrap_or(UNIX_EPOCH)
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension)
    }
}

/// Resolve the file a stage just wrote.
pub fn locate_artifact(query: &ArtifactQuery<'_>) -> Result<LocatedArtifact> {
    let exact = query
        .export_dir
        .join(format!("{}.{}", query.requested_stem, query.extension));
    if exact.is_file() {
        return Ok(LocatedArtifact {
            path: exact,
            strategy: LocateStrategy::ExactName,
        });
    }
    debug!(
        "{} not found under requested name {}, scanning {}",
        query.what,
        exact.display(),
        query.export_dir.display()
    );

    let window_start = query.window_start();
    let keyword = query.keyword.to_lowercase();
    let recent = newest(
        files_under(query.export_dir)
            .filter(|p| query.has_extension(p))
            .filter(|p| file_name_lower(p).contains(&keyword))
            .filter_map(FileCandidate::from_path)
            .filter(|c| c.modified >= window_start),
    );
    if let Some(found) = recent {
        return Ok(LocatedArtifact {
            path: found.path,
            strategy: LocateStrategy::RecentKeyword,
        });
    }

    let matcher = name_matcher(query.glob)?;
    if let Some(found) = newest_matching(query.export_dir, &matcher) {
        return Ok(LocatedArtifact {
            path: found.path,
            strategy: LocateStrategy::Glob,
        });
    }

    if let Some(parent) = query.export_dir.parent() {
        if let Some(found) = newest_matching(parent, &matcher) {
            return Ok(LocatedArtifact {
                path: found.path,
                strategy: LocateStrategy::ParentGlob,
            });
        }
    }

    let candidates: Vec<PathBuf> = files_under(query.export_dir)
        .filter(|p| query.has_extension(p))
        .collect();
    warn!(
        "Could not find {}. Dump of .{} files under {}:",
        query.what,
        query.extension,
        query.export_dir.display()
    );
    for path in &candidates {
        warn!("   - {}", path.display());
    }

    Err(SfmError::ArtifactNotFound {
        what: query.what.to_string(),
        searched: query.export_dir.to_path_buf(),
        candidates,
    })
}

/// Pick the newest feature store in `export_dir` (not recursive), or fall
/// back to `<fallback_stem>.h5` when nothing matches `glob`.
pub fn locate_feature_store(export_dir: &Path, glob: &str, fallback_stem: &str) -> Result<PathBuf> {
    let matcher = name_matcher(glob)?;
    let found = std::fs::read_dir(export_dir)
        .map(|entries| {
            newest(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file() && matches_name(&matcher, p))
                    .filter_map(FileCandidate::from_path),
            )
        })
        .unwrap_or(None);

    Ok(match found {
        Some(candidate) => candidate.path,
        None => export_dir.join(format!(
            "{}.{}",
            fallback_stem,
            LocatorConfig::ARTIFACT_EXTENSION
        )),
    })
}

fn name_matcher(glob: &str) -> Result<GlobMatcher> {
    Ok(Glob::new(glob)?.compile_matcher())
}

fn matches_name(matcher: &GlobMatcher, path: &Path) -> bool {
    path.file_name().map(|n| matcher.is_match(n)).unwrap_or(false)
}

fn newest_matching(root: &Path, matcher: &GlobMatcher) -> Option<FileCandidate> {
    newest(
        files_under(root)
            .filter(|p| matches_name(matcher, p))
            .filter_map(FileCandidate::from_path),
    )
}

fn files_under(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
