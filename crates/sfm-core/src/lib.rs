//! SfM Core - Headless orchestration of a four-stage structure-from-motion run.
//!
//! The vision stages themselves (pair generation, feature extraction,
//! matching, reconstruction) are external entry points reached through
//! [`stage::StageEntry`]. This crate binds to them without knowing their
//! exact signatures, finds what they wrote, and consolidates each run into
//! a COLMAP-style tree (`database.db` + `sparse/0`).
//!
//! # Example
//!
//! ```rust,ignore
//! use sfm_core::{hloc_stage_set, Pipeline, PipelineOptions};
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> sfm_core::Result<()> {
//!     let stages = hloc_stage_set(Path::new("python3"), Path::new("/tmp/sfm-bridge"))?;
//!     let pipeline = Pipeline::new(stages, PipelineOptions::default());
//!
//!     let report = pipeline.run_project(Path::new("/data/scene"), None).await?;
//!     println!("sparse model at {:?}", report.consolidation.sparse_dir);
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod locator;
pub mod manifest;
pub mod pipeline;
pub mod project;
pub mod stage;

// Re-export commonly used types
pub use config::{LayoutConfig, PipelineOptions};
pub use consolidate::{consolidate, move_with_dedup, ConsolidationReport, MoveOutcome};
pub use error::{Result, SfmError};
pub use locator::{locate_artifact, ArtifactQuery, LocatedArtifact};
pub use manifest::{RunManifest, RunSettings};
pub use pipeline::{consolidate_only, Pipeline, ProjectOutcome, RunReport};
pub use project::Project;
pub use stage::python::hloc_stage_set;
pub use stage::{ArgValue, Binding, CallError, FnStage, StageEntry, StageKind, StageSet};
