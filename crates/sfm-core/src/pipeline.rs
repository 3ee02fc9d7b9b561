//! Per-project pipeline driver.
//!
//! ```text
//! validate -> manifest -> reset sfm/ -> pairs -> features -> matches
//!          -> reconstruction -> consolidate
//! ```
//!
//! Stages run strictly one after another. A failure aborts the current
//! project only; [`Pipeline::run_projects`] moves on to the next one.

use crate::config::{LayoutConfig, LocatorConfig, PipelineOptions, StageConfig};
use crate::consolidate::{consolidate, ConsolidationReport};
use crate::error::IoResultExt;
use crate::locator::{locate_artifact, locate_feature_store, ArtifactQuery};
use crate::manifest::{RunManifest, RunSettings};
use crate::project::Project;
use crate::stage::bindings::ReconstructionInputs;
use crate::stage::{
    extraction_bindings, invoke_stage, matching_bindings, pairing_bindings,
    reconstruction_bindings, Binding, Invocation, StageKind, StageSet,
};
use crate::{Result, SfmError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

/// Everything a completed project run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub project_dir: PathBuf,
    pub output_root: PathBuf,
    pub work_dir: PathBuf,
    pub manifest: PathBuf,
    pub features: PathBuf,
    pub matches: PathBuf,
    /// One entry per stage, in execution order.
    pub invocations: Vec<(StageKind, Invocation)>,
    pub consolidation: ConsolidationReport,
}

/// Result of one project in a multi-project run.
#[derive(Debug)]
pub struct ProjectOutcome {
    pub project: PathBuf,
    pub result: Result<RunReport>,
}

impl ProjectOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Sequences the four stages against one project at a time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: StageSet,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(stages: StageSet, options: PipelineOptions) -> Self {
        Self { stages, options }
    }

    /// Run every project in order, continuing past failures.
    pub async fn run_projects(
        &self,
        projects: &[PathBuf],
        output_root: Option<&Path>,
    ) -> Vec<ProjectOutcome> {
        let mut outcomes = Vec::with_capacity(projects.len());
        for project in projects {
            let result = self.run_project(project, output_root).await;
            if let Err(e) = &result {
                error!("Project {} failed: {}", project.display(), e);
            }
            outcomes.push(ProjectOutcome {
                project: project.clone(),
                result,
            });
        }
        outcomes
    }

    /// Run the full pipeline for one project.
    ///
    /// Outputs land under `output_root`, or under the project directory when
    /// none is given.
    pub async fn run_project(
        &self,
        project_dir: &Path,
        output_root: Option<&Path>,
    ) -> Result<RunReport> {
        let project = Project::open(project_dir)?;
        info!(
            "Project {} ({} images)",
            project.root().display(),
            project.images().len()
        );

        let output_root = resolve_output_root(&project, output_root)?;
        let work_dir = LayoutConfig::work_dir(&output_root);
        std::fs::create_dir_all(&work_dir).with_path(&work_dir)?;

        let manifest = RunManifest {
            project_dir: project.root().to_path_buf(),
            images_dir: project.images_dir().to_path_buf(),
            output_root: output_root.clone(),
            work_dir: work_dir.clone(),
            settings: RunSettings::with_max_keypoints(self.options.max_keypoints),
        }
        .write()?;

        let sfm_dir = reset_reconstruction_dir(&work_dir)?;
        let image_list = project.write_image_list(&work_dir)?;
        let mut invocations = Vec::with_capacity(StageKind::ALL.len());

        // [1/4] pairs
        let pairs = work_dir.join(LayoutConfig::PAIRS_FILENAME);
        let bindings = pairing_bindings(project.images_dir(), &image_list, &pairs);
        invocations.push(self.invoke(StageKind::Pairing, &bindings).await?);

        // [2/4] features
        let feature_conf = self.feature_conf().await?;
        let feature_stem = output_name(&feature_conf, StageConfig::FEATURE_OUTPUT);
        let bindings =
            extraction_bindings(&feature_conf, project.images_dir(), &image_list, &work_dir);
        invocations.push(self.invoke(StageKind::Extraction, &bindings).await?);
        let features =
            locate_feature_store(&work_dir, LocatorConfig::FEATURE_GLOB, &feature_stem)?;
        let features_name = features
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(feature_stem);
        info!("Features: {}", features.display());

        // [3/4] matches
        let matcher_conf = self.matcher_conf().await?;
        let matches_stem = output_name(&matcher_conf, StageConfig::MATCHER_OUTPUT);
        let bindings = matching_bindings(&matcher_conf, &pairs, &features_name, &work_dir);
        let started = SystemTime::now();
        invocations.push(self.invoke(StageKind::Matching, &bindings).await?);
        let matches = locate_artifact(
            &ArtifactQuery::matches(&work_dir, &matches_stem, started)
                .with_tolerance(self.options.match_time_tolerance),
        )?
        .path;
        info!("Matches: {}", matches.display());

        // [4/4] reconstruction
        let bindings = reconstruction_bindings(ReconstructionInputs {
            sfm_dir: &sfm_dir,
            images_dir: project.images_dir(),
            pairs: &pairs,
            features: &features,
            matches: &matches,
        });
        invocations.push(self.invoke(StageKind::Reconstruction, &bindings).await?);

        let consolidation = consolidate(&work_dir, &output_root)?;
        log_summary(&output_root, &consolidation);

        Ok(RunReport {
            project_dir: project.root().to_path_buf(),
            output_root,
            work_dir,
            manifest,
            features,
            matches,
            invocations,
            consolidation,
        })
    }

    async fn invoke(
        &self,
        kind: StageKind,
        bindings: &[Binding],
    ) -> Result<(StageKind, Invocation)> {
        let entry = self.stages.get(kind);
        info!(
            "[{}/{}] {} ({})",
            kind.step(),
            StageKind::ALL.len(),
            kind,
            entry.describe()
        );
        let invocation = invoke_stage(kind, entry.as_ref(), bindings).await?;
        Ok((kind, invocation))
    }

    /// `superpoint_aachen` preset (or the built-in default) with the run's
    /// keypoint cap applied.
    async fn feature_conf(&self) -> Result<Value> {
        let conf = self
            .stages
            .extraction
            .preset(StageConfig::FEATURE_PRESET)
            .await?
            .unwrap_or_else(|| {
                warn!(
                    "No '{}' preset, using built-in feature configuration",
                    StageConfig::FEATURE_PRESET
                );
                StageConfig::default_feature_conf(self.options.max_keypoints)
            });
        Ok(with_max_keypoints(conf, self.options.max_keypoints))
    }

    async fn matcher_conf(&self) -> Result<Value> {
        Ok(self
            .stages
            .matching
            .preset(StageConfig::MATCHER_PRESET)
            .await?
            .unwrap_or_else(|| {
                warn!(
                    "No '{}' preset, using built-in matcher configuration",
                    StageConfig::MATCHER_PRESET
                );
                StageConfig::default_matcher_conf()
            }))
    }
}

/// Re-run only the consolidation step for a project's previous run.
pub fn consolidate_only(project_dir: &Path, output_root: Option<&Path>) -> Result<ConsolidationReport> {
    let project_dir = std::path::absolute(project_dir).with_path(project_dir)?;
    let output_root = match output_root {
        Some(root) => std::path::absolute(root).with_path(root)?,
        None => project_dir,
    };
    let work_dir = LayoutConfig::work_dir(&output_root);
    if !work_dir.is_dir() {
        return Err(SfmError::Config {
            message: format!("no work area at {}", work_dir.display()),
        });
    }

    match RunManifest::load(&work_dir)? {
        Some(manifest) => info!(
            "Consolidating run of {} (max_keypoints={})",
            manifest.project_dir.display(),
            manifest.settings.max_keypoints
        ),
        None => warn!("No run manifest in {}", work_dir.display()),
    }

    let report = consolidate(&work_dir, &output_root)?;
    log_summary(&output_root, &report);
    Ok(report)
}

fn resolve_output_root(project: &Project, output_root: Option<&Path>) -> Result<PathBuf> {
    let root = match output_root {
        Some(root) => std::path::absolute(root).with_path(root)?,
        None => project.root().to_path_buf(),
    };
    std::fs::create_dir_all(&root).with_path(&root)?;
    Ok(root)
}

/// Delete and recreate `<work_dir>/sfm`.
fn reset_reconstruction_dir(work_dir: &Path) -> Result<PathBuf> {
    let sfm_dir = LayoutConfig::reconstruction_dir(work_dir);
    if sfm_dir.exists() {
        std::fs::remove_dir_all(&sfm_dir)
            .map_err(|e| SfmError::io("clearing previous reconstruction", &sfm_dir, e))?;
    }
    std::fs::create_dir_all(&sfm_dir).with_path(&sfm_dir)?;
    Ok(sfm_dir)
}

fn with_max_keypoints(mut conf: Value, max_keypoints: u32) -> Value {
    if let Some(obj) = conf.as_object_mut() {
        let model = obj.entry("model").or_insert_with(|| json!({}));
        if let Some(model) = model.as_object_mut() {
            model.insert("max_keypoints".to_string(), json!(max_keypoints));
        }
    }
    conf
}

fn output_name(conf: &Value, fallback: &str) -> String {
    conf.get("output")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn log_summary(output_root: &Path, report: &ConsolidationReport) {
    info!("[DONE] Output root: {}", output_root.display());
    match &report.database {
        Some(db) => info!("  database: {}", db.display()),
        None => info!("  database: (none)"),
    }
    match &report.sparse_dir {
        Some(dir) => info!("  sparse model: {}", dir.display()),
        None => info!("  sparse model: (none)"),
    }
}
