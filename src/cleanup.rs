// src/cleanup.rs

//! Post-install artifact cleanup
//!
//! Removes descriptor-listed paths from the installed tree after a
//! successful install step (validation schemas, documentation trees and
//! similar payload that serves no purpose at runtime). Patterns are glob
//! expressions relative to the artifact root; a pattern matching nothing
//! is not an error, so cleanup is idempotent.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Removes unwanted paths from an installed tree
pub struct PostInstallCleaner {
    artifact_root: PathBuf,
}

impl PostInstallCleaner {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
        }
    }

    /// Remove everything matching `patterns`, returning removed paths
    /// relative to the artifact root
    pub fn clean(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        // The root is a literal path; only the declared pattern may glob.
        let root = glob::Pattern::escape(&self.artifact_root.to_string_lossy());
        let mut removed = Vec::new();
        for pattern in patterns {
            self.check_pattern(pattern)?;
            let full_pattern = format!("{}/{pattern}", root.trim_end_matches('/'));
            let matches = glob::glob(&full_pattern)
                .map_err(|e| Error::InvalidDescriptor(format!("bad remove pattern '{pattern}': {e}")))?;

            let mut matched_any = false;
            for entry in matches {
                let path = entry
                    .map_err(|e| Error::Io(e.into_error()))?;
                matched_any = true;
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
                if let Ok(rel) = path.strip_prefix(&self.artifact_root) {
                    info!("Removed {}", rel.display());
                    removed.push(rel.to_path_buf());
                }
            }
            if !matched_any {
                debug!("Pattern '{pattern}' matched nothing");
            }
        }
        Ok(removed)
    }

    /// Reject absolute patterns and parent traversal before globbing
    fn check_pattern(&self, pattern: &str) -> Result<()> {
        let path = Path::new(pattern);
        if path.is_absolute() {
            return Err(Error::InvalidDescriptor(format!(
                "remove pattern '{pattern}' must be relative"
            )));
        }
        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(Error::InvalidDescriptor(format!(
                    "remove pattern '{pattern}' escapes the artifact root"
                )));
            }
        }
        Ok(())
    }
}
