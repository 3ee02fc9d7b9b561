//! Error types for sfm-core.
//!
//! One variant per failure class the pipeline distinguishes: input problems
//! are reported before any stage runs, interface mismatches only after every
//! candidate binding of a stage was tried, and missing artifacts carry the
//! listing of what was found instead.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::stage::StageKind;

/// Main error type for sfm-core.
#[derive(Debug, Error)]
pub enum SfmError {
    // Input errors
    #[error("'images' folder not found in: {0}")]
    MissingImagesDir(PathBuf),

    #[error("No image files found under: {0}")]
    NoImages(PathBuf),

    // Stage errors
    #[error("{stage} stage rejected every candidate binding (tried {}): {message}", attempted.join(", "))]
    InterfaceMismatch {
        stage: StageKind,
        attempted: Vec<String>,
        message: String,
    },

    #[error("{stage} stage failed: {message}")]
    StageFailed { stage: StageKind, message: String },

    #[error("Could not locate the exported {what} under {searched:?} ({} candidate files seen)", candidates.len())]
    ArtifactNotFound {
        what: String,
        searched: PathBuf,
        /// Every file with the artifact extension found under the search root.
        candidates: Vec<PathBuf>,
    },

    #[error("Python bridge error: {message}")]
    Bridge { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for sfm-core operations.
pub type Result<T> = std::result::Result<T, SfmError>;

impl From<std::io::Error> for SfmError {
    fn from(err: std::io::Error) -> Self {
        SfmError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SfmError {
    fn from(err: serde_json::Error) -> Self {
        SfmError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<globset::Error> for SfmError {
    fn from(err: globset::Error) -> Self {
        SfmError::Config {
            message: format!("invalid glob: {}", err),
        }
    }
}

impl SfmError {
    /// Create an IO error with a short description of what was being done.
    pub fn io(context: &str, path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref();
        SfmError::Io {
            message: format!("{} ({}): {}", context, path.display(), err),
            path: Some(path.to_path_buf()),
            source: Some(err),
        }
    }

    /// True for the input errors that abort a project before any stage runs.
    pub fn is_input_error(&self) -> bool {
        matches!(self, SfmError::MissingImagesDir(_) | SfmError::NoImages(_))
    }

    /// The stage this error originated in, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            SfmError::InterfaceMismatch { stage, .. } | SfmError::StageFailed { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

/// Attach a path to a bare `std::io::Error`.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| {
            let path = path.as_ref();
            SfmError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
                source: Some(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SfmError::MissingImagesDir(PathBuf::from("/data/proj"));
        assert_eq!(err.to_string(), "'images' folder not found in: /data/proj");
    }

    #[test]
    fn test_interface_mismatch_lists_attempts() {
        let err = SfmError::InterfaceMismatch {
            stage: StageKind::Matching,
            attempted: vec!["keyword".into(), "positional".into()],
            message: "unexpected keyword argument 'pairs'".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("matching stage"));
        assert!(text.contains("keyword, positional"));
        assert_eq!(err.stage(), Some(StageKind::Matching));
    }

    #[test]
    fn test_input_errors() {
        assert!(SfmError::NoImages(PathBuf::from("x")).is_input_error());
        assert!(!SfmError::Config { message: "x".into() }.is_input_error());
    }

    #[test]
    fn test_with_path_keeps_path() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        match res.with_path("/tmp/missing") {
            Err(SfmError::Io { path, .. }) => assert_eq!(path, Some(PathBuf::from("/tmp/missing"))),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
