// src/configure.rs

//! Configure-step argument generation
//!
//! Turns a descriptor's static options and the resolved dependency set
//! into the `-D` argument list handed to the configure program. The
//! function is pure: the same descriptor and dependency set always yield
//! the same argument vector, which is what makes build reproducibility
//! checks meaningful.
//!
//! Static options keep descriptor order and win over generated ones;
//! generated dependency options are emitted in a stable sorted order.

use crate::descriptor::ComponentDescriptor;
use crate::error::{Error, Result};
use crate::resolve::ResolvedDependency;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

/// Builds configure arguments for one component
pub struct BuildConfigurator {
    install_prefix: String,
}

impl BuildConfigurator {
    pub fn new(install_prefix: impl Into<String>) -> Self {
        Self {
            install_prefix: install_prefix.into(),
        }
    }

    /// The full `-D` argument list, source directory excluded
    ///
    /// Order is static descriptor options first (descriptor order), then
    /// generated dependency options (sorted by key), then the install
    /// prefix unless a static option already set it.
    pub fn args(
        &self,
        descriptor: &ComponentDescriptor,
        dependencies: &[ResolvedDependency],
    ) -> Result<Vec<String>> {
        // Base key is the part before any `:TYPE` suffix; two options
        // spelling the same key differently still collide.
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut args = Vec::new();

        for option in &descriptor.options {
            let (key, value) = split_option(option)?;
            let base = base_key(&key);
            if let Some(existing) = seen.get(&base) {
                if *existing == value {
                    // Identical restatement, dedupe silently.
                    continue;
                }
                return Err(Error::ConfigConflict {
                    key: base,
                    existing: existing.clone(),
                    requested: value,
                });
            }
            seen.insert(base, value.clone());
            args.push(format!("-D{key}={value}"));
        }

        // BTreeMap gives the generated block a stable order regardless of
        // resolution order.
        let mut generated: BTreeMap<String, String> = BTreeMap::new();
        for dep in dependencies {
            generated.insert(
                format!("{}:PATH", dep.include_option_key),
                path_str(&dep.include_dir),
            );
            for (key, lib) in &dep.libraries {
                generated.insert(format!("{key}:FILEPATH"), path_str(lib));
            }
        }
        for (key, value) in generated {
            let base = base_key(&key);
            if seen.contains_key(&base) {
                // Descriptor override, the static value stands.
                continue;
            }
            seen.insert(base, value.clone());
            args.push(format!("-D{key}={value}"));
        }

        if !seen.contains_key("CMAKE_INSTALL_PREFIX") {
            args.push(format!(
                "-DCMAKE_INSTALL_PREFIX:PATH={}",
                self.install_prefix
            ));
        }
        Ok(args)
    }
}

fn split_option(option: &str) -> Result<(String, String)> {
    match option.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::InvalidDescriptor(format!(
            "option '{option}' is not KEY=VALUE"
        ))),
    }
}

fn base_key(key: &str) -> String {
    key.split(':').next().unwrap_or(key).to_string()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
