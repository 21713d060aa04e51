// src/pipeline.rs

//! End-to-end build pipeline
//!
//! Drives one component descriptor through fetch, dependency resolution,
//! patching, configure, compile, install and cleanup. Each phase maps to
//! a [`Stage`]; a failure is reported as the stage it happened in plus
//! the underlying error, so a log line like `build failed during
//! Patching` points straight at the responsible phase.
//!
//! The pipeline owns no policy about what the component builds. What it
//! guarantees is ordering (stages run strictly in sequence, a failed
//! stage stops the run), environment scoping (patch env overlays stay
//! with their patch and never reach the build environment) and
//! attribution.

use crate::configure::BuildConfigurator;
use crate::cleanup::PostInstallCleaner;
use crate::descriptor::ComponentDescriptor;
use crate::environment::{BuildEnvironment, Toolchain};
use crate::error::{Error, Result};
use crate::executor::{BuildExecutor, BuildStep, StepKind};
use crate::fetch::{FetchConfig, SourceFetcher, HTTP_TIMEOUT};
use crate::hash;
use crate::patch::{AppliedPatch, Patch, PatchApplier};
use crate::resolve::{DependencyRegistry, DependencyResolver};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Default hard limit for one build step
const STEP_TIMEOUT: Duration = Duration::from_secs(3600);

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Resolving,
    Patching,
    Configuring,
    Building,
    Installing,
    Cleaning,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "Fetching",
            Stage::Resolving => "Resolving",
            Stage::Patching => "Patching",
            Stage::Configuring => "Configuring",
            Stage::Building => "Building",
            Stage::Installing => "Installing",
            Stage::Cleaning => "Cleaning",
            Stage::Done => "Done",
        };
        f.write_str(name)
    }
}

/// A pipeline failure attributed to the stage it happened in
#[derive(Debug)]
pub struct PipelineError {
    pub stage: Stage,
    pub source: Error,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed during {}: {}", self.stage, self.source)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Programs and arguments for the configure/compile/install steps
///
/// Defaults match a cmake out-of-tree build. Overriding the programs is
/// how tests substitute stub scripts for the real toolchain.
#[derive(Debug, Clone)]
pub struct BuildSystem {
    pub configure_program: String,
    pub build_program: String,
    pub install_args: Vec<String>,
}

impl Default for BuildSystem {
    fn default() -> Self {
        Self {
            configure_program: "cmake".to_string(),
            build_program: "make".to_string(),
            install_args: vec!["install".to_string()],
        }
    }
}

/// Everything a pipeline run needs besides the descriptor
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shared install prefix dependencies are resolved under and the
    /// component installs into
    pub install_prefix: PathBuf,
    /// Root for per-component working directories
    pub work_root: PathBuf,
    pub step_timeout: Duration,
    pub http_timeout: Duration,
    /// Parallelism passed to the compile step
    pub jobs: usize,
    pub toolchain: Toolchain,
    pub build_system: BuildSystem,
    pub registry: DependencyRegistry,
    /// Extra PATH entries appended after the prefix bin directory
    pub base_path: Option<String>,
    /// Leave the working directory behind after a successful run
    pub keep_workdir: bool,
}

impl PipelineConfig {
    pub fn new(install_prefix: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            install_prefix: install_prefix.into(),
            work_root: work_root.into(),
            step_timeout: STEP_TIMEOUT,
            http_timeout: HTTP_TIMEOUT,
            jobs: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            toolchain: Toolchain::default(),
            build_system: BuildSystem::default(),
            registry: DependencyRegistry::builtin(),
            base_path: None,
            keep_workdir: false,
        }
    }
}

/// The installed tree a successful run produced
#[derive(Debug, Clone)]
pub struct ArtifactTree {
    pub root: PathBuf,
}

impl ArtifactTree {
    /// Content digest of the whole tree, for reproducibility checks
    pub fn digest(&self) -> std::io::Result<String> {
        hash::tree_digest(&self.root)
    }
}

/// Summary of one successful pipeline run
#[derive(Debug)]
pub struct BuildReport {
    pub artifact: ArtifactTree,
    pub applied_patches: Vec<AppliedPatch>,
    pub configure_args: Vec<String>,
    pub removed_paths: Vec<PathBuf>,
    /// One line per completed stage
    pub log: Vec<String>,
}

/// Orchestrates one component build from descriptor to installed tree
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline for `descriptor`
    ///
    /// `patches` supplies the payloads for the patch names the descriptor
    /// lists; names and order must match exactly.
    pub fn run(
        &self,
        descriptor: &ComponentDescriptor,
        patches: &[Patch],
    ) -> std::result::Result<BuildReport, PipelineError> {
        let at = |stage: Stage| move |source: Error| PipelineError { stage, source };

        info!(
            "Building {} {}",
            descriptor.name(),
            descriptor.version().unwrap_or("unversioned")
        );

        let mut log = Vec::new();

        info!("{}", Stage::Fetching);
        let fetcher = SourceFetcher::new(FetchConfig {
            work_root: self.config.work_root.clone(),
            http_timeout: self.config.http_timeout,
        })
        .map_err(at(Stage::Fetching))?;
        let fetched = fetcher.fetch(descriptor).map_err(at(Stage::Fetching))?;
        log.push(format!(
            "{}: {} verified and extracted",
            Stage::Fetching,
            descriptor.archive_filename()
        ));

        info!("{}", Stage::Resolving);
        let resolver = DependencyResolver::with_registry(
            &self.config.install_prefix,
            self.config.registry.clone(),
        );
        let dependencies = resolver
            .resolve_all(&descriptor.dependencies)
            .map_err(at(Stage::Resolving))?;
        debug!("Resolved {} dependencies", dependencies.len());
        log.push(format!(
            "{}: {} dependencies",
            Stage::Resolving,
            dependencies.len()
        ));

        info!("{}", Stage::Patching);
        check_patch_set(descriptor, patches).map_err(at(Stage::Patching))?;
        let applier = PatchApplier::new(&fetched.source_dir);
        let applied_patches = applier.apply_all(patches).map_err(at(Stage::Patching))?;
        log.push(format!(
            "{}: {} patches applied",
            Stage::Patching,
            applied_patches.len()
        ));

        // Standard flags plus toolchain pins. Patch env overlays stay on
        // their AppliedPatch records and never reach the build steps.
        let mut env = BuildEnvironment::standard(
            &self.config.install_prefix,
            self.config.base_path.as_deref(),
        );
        self.config.toolchain.apply(&mut env);

        info!("{}", Stage::Configuring);
        let configurator =
            BuildConfigurator::new(self.config.install_prefix.to_string_lossy().into_owned());
        let configure_args = configurator
            .args(descriptor, &dependencies)
            .map_err(at(Stage::Configuring))?;

        let build_dir = fetched.source_dir.join("build");
        fs::create_dir_all(&build_dir)
            .map_err(|e| at(Stage::Configuring)(e.into()))?;
        let executor = BuildExecutor::new(&build_dir, env, self.config.step_timeout);

        let mut full_configure_args = configure_args.clone();
        full_configure_args.push(fetched.source_dir.to_string_lossy().into_owned());
        executor
            .run(&BuildStep::new(
                StepKind::Configure,
                &self.config.build_system.configure_program,
                full_configure_args,
            ))
            .map_err(at(Stage::Configuring))?;
        log.push(format!(
            "{}: {} arguments",
            Stage::Configuring,
            configure_args.len()
        ));

        info!("{}", Stage::Building);
        executor
            .run(&BuildStep::new(
                StepKind::Compile,
                &self.config.build_system.build_program,
                vec!["-j".to_string(), self.config.jobs.to_string()],
            ))
            .map_err(at(Stage::Building))?;
        log.push(format!("{}: compile completed", Stage::Building));

        info!("{}", Stage::Installing);
        executor
            .run(&BuildStep::new(
                StepKind::Install,
                &self.config.build_system.build_program,
                self.config.build_system.install_args.clone(),
            ))
            .map_err(at(Stage::Installing))?;
        log.push(format!("{}: install completed", Stage::Installing));

        info!("{}", Stage::Cleaning);
        let cleaner = PostInstallCleaner::new(&self.config.install_prefix);
        let removed_paths = cleaner
            .clean(&descriptor.remove_paths)
            .map_err(at(Stage::Cleaning))?;
        log.push(format!(
            "{}: {} paths removed",
            Stage::Cleaning,
            removed_paths.len()
        ));

        if !self.config.keep_workdir {
            let _ = fs::remove_dir_all(&fetched.workdir);
        }

        info!("{}: {}", Stage::Done, descriptor.name());
        Ok(BuildReport {
            artifact: ArtifactTree {
                root: self.config.install_prefix.clone(),
            },
            applied_patches,
            configure_args,
            removed_paths,
            log,
        })
    }
}

/// Require supplied patches to match the descriptor's list, in order
fn check_patch_set(descriptor: &ComponentDescriptor, patches: &[Patch]) -> Result<()> {
    let supplied: Vec<&str> = patches.iter().map(|p| p.name.as_str()).collect();
    let declared: Vec<&str> = descriptor.patches.iter().map(String::as_str).collect();
    if supplied != declared {
        return Err(Error::InvalidDescriptor(format!(
            "patch set mismatch: descriptor lists [{}], supplied [{}]",
            declared.join(", "),
            supplied.join(", ")
        )));
    }
    Ok(())
}
