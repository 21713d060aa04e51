// src/error.rs

//! Crate-wide error type
//!
//! Every pipeline stage fails fast with one of these variants; the pipeline
//! wraps them with the stage they occurred in (see [`crate::pipeline`]).
//! No variant is retried inside the crate - retry policy belongs to the
//! caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the build pipeline and its stages
#[derive(Debug, Error)]
pub enum Error {
    /// Descriptor violates an invariant (e.g. version without hash)
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Network or storage failure while fetching the source
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Downloaded source does not match the pinned content hash
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A declared dependency path does not exist under the install prefix
    #[error("Unresolved dependency '{name}': missing {}", path.display())]
    UnresolvedDependency { name: String, path: PathBuf },

    /// A patch failed to apply; the source tree was restored
    #[error("Patch '{patch}' failed to apply: {detail}")]
    PatchConflict { patch: String, detail: String },

    /// Two static options target the same configuration key with
    /// different values
    #[error("Conflicting option '{key}': '{existing}' vs '{requested}'")]
    ConfigConflict {
        key: String,
        existing: String,
        requested: String,
    },

    /// A configure/compile/install step exited non-zero
    #[error("{step} step failed with exit code {exit_code}")]
    BuildStepFailed {
        step: String,
        exit_code: i32,
        output_tail: String,
    },

    /// An external operation exceeded its caller-supplied timeout
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Malformed input (descriptor file, archive name, cleanup pattern)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
