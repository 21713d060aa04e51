// src/lib.rs

//! Crucible Component Builder
//!
//! Builds native software components from declarative descriptors: fetch
//! and verify a source archive, resolve already-installed dependencies
//! under a shared prefix, apply patches atomically, then configure,
//! compile, install and clean up, all driven by a staged pipeline.
//!
//! # Architecture
//!
//! - Descriptor-first: One TOML document fully describes a component
//! - Staged pipeline: Strict phase ordering with per-stage failure
//!   attribution
//! - Atomic patching: A conflicting patch leaves the source tree as the
//!   previous patch left it
//! - Reproducibility: Pure configure-argument generation and tree
//!   digests make identical inputs checkable

pub mod cleanup;
pub mod configure;
pub mod descriptor;
pub mod environment;
mod error;
pub mod executor;
pub mod fetch;
pub mod hash;
pub mod patch;
pub mod pipeline;
pub mod resolve;

pub use cleanup::PostInstallCleaner;
pub use configure::BuildConfigurator;
pub use descriptor::{ComponentDescriptor, ComponentSection, SourceSection};
pub use environment::{BuildEnvironment, Toolchain};
pub use error::{Error, Result};
pub use executor::{BuildExecutor, BuildStep, StepKind};
pub use fetch::{FetchConfig, FetchedSource, SourceFetcher};
pub use patch::{AppliedPatch, Patch, PatchApplier};
pub use pipeline::{
    ArtifactTree, BuildReport, BuildSystem, Pipeline, PipelineConfig, PipelineError, Stage,
};
pub use resolve::{
    DependencyRegistry, DependencyResolver, DependencyRule, LibRule, ResolvedDependency,
};
