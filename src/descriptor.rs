// src/descriptor.rs

//! Component build descriptors
//!
//! A descriptor is the declarative specification of one buildable component:
//! where its source lives, the content hash pinning it, which previously
//! built dependencies it links against, which patches to apply (in order),
//! and the static options handed to the downstream build system.
//!
//! Descriptors are plain data. The pipeline (see [`crate::pipeline`])
//! consumes them; nothing here performs I/O beyond TOML parsing.

use crate::error::{Error, Result};
use crate::hash::is_sha256_hex;
use serde::{Deserialize, Serialize};

/// A complete descriptor for building one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Component identity and license metadata
    pub component: ComponentSection,

    /// Source archive location and integrity hash
    pub source: SourceSection,

    /// Ordered symbolic names of previously built dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Ordered identifiers of patches to apply; payloads are supplied
    /// separately (see [`crate::patch::Patch`])
    #[serde(default)]
    pub patches: Vec<String>,

    /// Static `KEY=VALUE` options for the build system's configure step,
    /// in descriptor order
    #[serde(default)]
    pub options: Vec<String>,

    /// Artifact-relative subpaths removed after a successful install
    #[serde(default)]
    pub remove_paths: Vec<String>,
}

/// Component identity section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSection {
    /// Component name
    pub name: String,

    /// Pinned version; must be set together with `source.sha256`
    #[serde(default)]
    pub version: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// License file path inside the source tree
    #[serde(default)]
    pub license_file: Option<String>,
}

/// Source archive section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Archive URL template or local path
    ///
    /// Supports `%(version)s` substitution.
    /// Example: `https://example.org/cyrus-%(version)s.tar.gz`
    pub url: String,

    /// Expected SHA-256 of the archive; must be set together with
    /// `component.version`
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ComponentDescriptor {
    /// Create a descriptor with a pinned version and hash
    pub fn new(name: &str, version: &str, url: &str, sha256: &str) -> Self {
        Self {
            component: ComponentSection {
                name: name.to_string(),
                version: Some(version.to_string()),
                license: None,
                license_file: None,
            },
            source: SourceSection {
                url: url.to_string(),
                sha256: Some(sha256.to_string()),
            },
            dependencies: Vec::new(),
            patches: Vec::new(),
            options: Vec::new(),
            remove_paths: Vec::new(),
        }
    }

    /// Parse a descriptor from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let descriptor: Self =
            toml::from_str(text).map_err(|e| Error::Parse(format!("descriptor: {e}")))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Set the license metadata
    pub fn with_license(mut self, license: &str, license_file: Option<&str>) -> Self {
        self.component.license = Some(license.to_string());
        self.component.license_file = license_file.map(|f| f.to_string());
        self
    }

    /// Append a dependency name
    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    /// Append a patch identifier
    pub fn with_patch(mut self, name: &str) -> Self {
        self.patches.push(name.to_string());
        self
    }

    /// Append a static configure option (`KEY=VALUE`)
    pub fn with_option(mut self, option: &str) -> Self {
        self.options.push(option.to_string());
        self
    }

    /// Append a removable artifact subpath
    pub fn with_remove_path(mut self, path: &str) -> Self {
        self.remove_paths.push(path.to_string());
        self
    }

    /// Component name
    pub fn name(&self) -> &str {
        &self.component.name
    }

    /// Pinned version, if any
    pub fn version(&self) -> Option<&str> {
        self.component.version.as_deref()
    }

    /// Expected archive hash, if any
    pub fn sha256(&self) -> Option<&str> {
        self.source.sha256.as_deref()
    }

    /// Source URL with `%(version)s` substituted
    pub fn source_url(&self) -> String {
        let mut url = self.source.url.clone();
        if let Some(version) = self.version() {
            url = url.replace("%(version)s", version);
        }
        url
    }

    /// Archive filename taken from the last URL segment
    pub fn archive_filename(&self) -> String {
        self.source_url()
            .split('/')
            .next_back()
            .unwrap_or("source.tar.gz")
            .to_string()
    }

    /// Check descriptor invariants
    ///
    /// Version and hash pin each other: a descriptor with one but not the
    /// other is invalid. The hash, when present, must be SHA-256 hex.
    pub fn validate(&self) -> Result<()> {
        if self.component.name.is_empty() {
            return Err(Error::InvalidDescriptor(
                "component name must not be empty".to_string(),
            ));
        }

        match (self.version(), self.sha256()) {
            (Some(_), None) => {
                return Err(Error::InvalidDescriptor(format!(
                    "'{}' pins a version but no source hash",
                    self.name()
                )));
            }
            (None, Some(_)) => {
                return Err(Error::InvalidDescriptor(format!(
                    "'{}' pins a source hash but no version",
                    self.name()
                )));
            }
            _ => {}
        }

        if let Some(hash) = self.sha256() {
            if !is_sha256_hex(hash) {
                return Err(Error::InvalidDescriptor(format!(
                    "'{}' source hash is not a sha256 hex digest",
                    self.name()
                )));
            }
        }

        for option in &self.options {
            if !option.contains('=') {
                return Err(Error::InvalidDescriptor(format!(
                    "option '{option}' is not KEY=VALUE"
                )));
            }
        }

        Ok(())
    }
}
