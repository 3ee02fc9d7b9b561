//! sfm-colmap - SuperPoint + LightGlue SfM into a clean COLMAP layout.
//!
//! Runs the hloc pipeline for each `--project` and leaves
//! `<output_root>/database.db` and `<output_root>/sparse/0` behind.

use anyhow::{bail, Result};
use clap::Parser;
use sfm_core::config::{BridgeConfig, StageConfig};
use sfm_core::{consolidate_only, hloc_stage_set, Pipeline, PipelineOptions, ProjectOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "sfm-colmap")]
#[command(about = "SuperPoint + LightGlue SfM -> COLMAP layout (database.db + sparse/0)")]
struct Args {
    /// Project folder containing an images/ subfolder (repeatable)
    #[arg(long = "project", required = true)]
    projects: Vec<PathBuf>,

    /// Where database.db and sparse/ are written (defaults to each project folder)
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Maximum SuperPoint keypoints per image
    #[arg(long, default_value_t = StageConfig::DEFAULT_MAX_KEYPOINTS)]
    max_keypoints: u32,

    /// Python interpreter with hloc installed
    #[arg(long, default_value = BridgeConfig::DEFAULT_PYTHON)]
    python: PathBuf,

    /// Directory the stage bridge script is deployed to
    #[arg(long)]
    bridge_dir: Option<PathBuf>,

    /// Backward tolerance when matching files by modification time
    #[arg(long)]
    match_tolerance_ms: Option<u64>,

    /// Only re-run consolidation of an existing work area
    #[arg(long)]
    consolidate_only: bool,

    /// Enable debug logging (otherwise RUST_LOG, defaulting to info)
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn pipeline_options(&self) -> PipelineOptions {
        let mut options = PipelineOptions {
            max_keypoints: self.max_keypoints,
            ..PipelineOptions::default()
        };
        if let Some(ms) = self.match_tolerance_ms {
            options.match_time_tolerance = Duration::from_millis(ms);
        }
        options
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_env_filter(log_filter(args.debug))
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let output_root = args.output_root.as_deref();
    let failed = if args.consolidate_only {
        run_consolidation(&args.projects, output_root)
    } else {
        let bridge_dir = args
            .bridge_dir
            .clone()
            .unwrap_or_else(BridgeConfig::default_dir);
        let stages = hloc_stage_set(&args.python, &bridge_dir)?;
        let pipeline = Pipeline::new(stages, args.pipeline_options());

        let outcomes = pipeline.run_projects(&args.projects, output_root).await;
        summarize(&outcomes)
    };

    if failed > 0 {
        bail!("{} of {} project(s) failed", failed, args.projects.len());
    }
    info!("All projects completed");
    Ok(())
}

fn log_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log a one-line summary and return the number of unsuccessful projects.
fn summarize(outcomes: &[ProjectOutcome]) -> usize {
    let (mut invalid, mut failed) = (0, 0);
    for outcome in outcomes.iter().filter(|o| !o.is_ok()) {
        match &outcome.result {
            Err(e) if e.is_input_error() => {
                warn!("Skipped {}: {}", outcome.project.display(), e);
                invalid += 1;
            }
            _ => failed += 1,
        }
    }
    info!(
        "{} completed, {} skipped (invalid input), {} failed",
        outcomes.len() - invalid - failed,
        invalid,
        failed
    );
    invalid + failed
}

fn run_consolidation(projects: &[PathBuf], output_root: Option<&Path>) -> usize {
    let mut failed = 0;
    for project in projects {
        if let Err(e) = consolidate_only(project, output_root) {
            error!("Consolidation of {} failed: {}", project.display(), e);
            failed += 1;
        }
    }
    failed
}
