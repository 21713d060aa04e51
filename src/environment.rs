// src/environment.rs

//! Build environments and toolchain pins
//!
//! A [`BuildEnvironment`] is the set of variables a build step runs under.
//! It is built incrementally: standard compiler flags for the install
//! prefix, then explicit [`Toolchain`] pins. It is always passed by value
//! into the executor; no stage reads the process-wide environment.

use std::collections::BTreeMap;
use std::path::Path;

/// Ordered variable map for build steps
///
/// Backed by a BTreeMap so iteration order, and therefore configure/build
/// inputs, are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard compiler flags for building against an embedded install
    /// prefix
    ///
    /// Points the compiler and linker at `<prefix>/include` and
    /// `<prefix>/lib`, bakes the rpath, and prepends `<prefix>/bin` to
    /// `base_path` (the caller's PATH, passed explicitly so nothing here
    /// reads global state).
    pub fn standard(prefix: &Path, base_path: Option<&str>) -> Self {
        let include = prefix.join("include");
        let lib = prefix.join("lib");
        let bin = prefix.join("bin");

        let mut env = Self::new();
        env.set("CFLAGS", format!("-I{} -O2", include.display()));
        env.set("CXXFLAGS", format!("-I{} -O2", include.display()));
        env.set("CPPFLAGS", format!("-I{}", include.display()));
        env.set(
            "LDFLAGS",
            format!("-Wl,-rpath,{} -L{}", lib.display(), lib.display()),
        );
        env.set(
            "PKG_CONFIG_PATH",
            lib.join("pkgconfig").display().to_string(),
        );
        match base_path {
            Some(path) => env.set("PATH", format!("{}:{}", bin.display(), path)),
            None => env.set("PATH", bin.display().to_string()),
        }
        env
    }

    /// Set a variable, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Append to a variable with a space separator, setting it if absent
    pub fn append(&mut self, key: &str, value: &str) {
        match self.vars.get_mut(key) {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(value);
            }
            None => {
                self.vars.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    /// A copy of this environment with `overlay` applied on top
    ///
    /// The base environment is never mutated, so overlays stay scoped to
    /// the copy.
    pub fn merged(&self, overlay: &BTreeMap<String, String>) -> Self {
        let mut merged = self.clone();
        for (key, value) in overlay {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    /// Iterate variables in deterministic (sorted) order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables set
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Explicit compiler pins, resolved once at pipeline start
///
/// Models descriptors that must build with a specific toolchain (e.g. a
/// pinned GCC under /opt) rather than whatever the ambient PATH finds.
/// Kept out of [`BuildEnvironment::standard`] so the pins are visible
/// configuration, not ambient state.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    /// C compiler path (sets `CC`)
    pub cc: Option<String>,
    /// C++ compiler path (sets `CXX`)
    pub cxx: Option<String>,
    /// Extra flags appended to `CXXFLAGS`
    pub cxxflags_append: Vec<String>,
}

impl Toolchain {
    /// Apply the pins to an environment
    pub fn apply(&self, env: &mut BuildEnvironment) {
        if let Some(cc) = &self.cc {
            env.set("CC", cc.clone());
        }
        if let Some(cxx) = &self.cxx {
            env.set("CXX", cxx.clone());
        }
        for flag in &self.cxxflags_append {
            env.append("CXXFLAGS", flag);
        }
    }
}
