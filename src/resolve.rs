// src/resolve.rs

//! Dependency resolution against a shared install prefix
//!
//! Maps each symbolic dependency name to the include directory and library
//! file(s) a previous pipeline run installed under the prefix. The default
//! convention is `<prefix>/include` plus `<prefix>/lib/lib<name>.<ext>`;
//! everything that deviates (versioned include subdirectories, odd library
//! file names, dependencies exposing several libraries) lives in a
//! [`DependencyRegistry`] table, so supporting a new dependency is a data
//! change, not a code change.
//!
//! Resolution is a hard precondition check: a missing path fails here with
//! the dependency named, instead of surfacing later as an opaque
//! downstream build error. Lookups only read already-built filesystem
//! state, so they run in parallel.

use crate::error::{Error, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Shared-library extension for the current platform
pub const fn platform_lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// One library exposed by a dependency
#[derive(Debug, Clone)]
pub struct LibRule {
    /// Configure option key, without the `:FILEPATH` type suffix
    /// (e.g. `CURL_LIBRARY_RELEASE`)
    pub option_key: String,
    /// Library file stem under `<prefix>/lib` (e.g. `libcurl`)
    pub file_stem: String,
}

/// Naming-convention overrides for one dependency
#[derive(Debug, Clone)]
pub struct DependencyRule {
    /// Option-key prefix for generated configure options (e.g. `APTPKG`
    /// for the `apt` dependency)
    pub option_prefix: String,
    /// Include subdirectory under `<prefix>/include`, for headers shipped
    /// in a versioned directory (e.g. `dbus-1.0`)
    pub include_subdir: Option<String>,
    /// Libraries this dependency exposes, in option-key order
    pub libs: Vec<LibRule>,
}

impl DependencyRule {
    /// The default convention for `name`: prefix `NAME` (uppercased,
    /// dashes to underscores), headers directly under `include`, one
    /// `lib<name>` library
    fn conventional(name: &str) -> Self {
        let prefix = name.to_uppercase().replace('-', "_");
        Self {
            option_prefix: prefix.clone(),
            include_subdir: None,
            libs: vec![LibRule {
                option_key: format!("{prefix}_LIBRARY"),
                file_stem: format!("lib{name}"),
            }],
        }
    }
}

/// Table of per-dependency naming overrides
#[derive(Debug, Clone, Default)]
pub struct DependencyRegistry {
    rules: HashMap<String, DependencyRule>,
}

impl DependencyRegistry {
    /// An empty registry; every dependency resolves by convention
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table covering common native dependencies that break
    /// the convention
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register_libs("apt", "APTPKG", None, &[("APTPKG_LIBRARIES", "libapt-pkg")]);
        registry.register_libs("bzip2", "BZIP2", None, &[("BZIP2_LIBRARY_RELEASE", "libbz2")]);
        registry.register_libs("curl", "CURL", None, &[("CURL_LIBRARY_RELEASE", "libcurl")]);
        registry.register_libs(
            "dbus",
            "DBUS",
            Some("dbus-1.0"),
            &[("DBUS_LIBRARIES", "libdbus-1")],
        );
        registry.register_libs("libacl", "ACL", None, &[("ACL_LIBRARY", "libacl")]);
        registry.register_libs("libgcrypt", "GCRYPT", None, &[("GCRYPT_LIBRARY", "libgcrypt")]);
        registry.register_libs(
            "libselinux",
            "SELINUX",
            None,
            &[("SELINUX_LIBRARY", "libselinux")],
        );
        registry.register_libs("libsepol", "SEPOL", None, &[("SEPOL_LIBRARY", "libsepol")]);
        registry.register_libs(
            "libxml2",
            "LIBXML2",
            Some("libxml2"),
            &[("LIBXML2_LIBRARY", "libxml2")],
        );
        registry.register_libs(
            "libxslt",
            "LIBXSLT",
            None,
            &[
                ("LIBXSLT_LIBRARY", "libxslt"),
                ("LIBXSLT_EXSLT_LIBRARY", "libexslt"),
            ],
        );
        registry.register_libs("libyaml", "LIBYAML", None, &[("LIBYAML_LIBRARY", "libyaml")]);
        registry.register_libs(
            "openssl",
            "OPENSSL",
            None,
            &[
                ("OPENSSL_SSL_LIBRARY", "libssl"),
                ("OPENSSL_CRYPTO_LIBRARY", "libcrypto"),
            ],
        );
        registry.register_libs("pcre2", "PCRE2", None, &[("PCRE2_LIBRARY", "libpcre2-8")]);
        registry.register_libs(
            "rpm",
            "RPM",
            None,
            &[("RPM_LIBRARY", "librpm"), ("RPMIO_LIBRARY", "librpmio")],
        );
        registry.register_libs(
            "util-linux",
            "BLKID",
            None,
            &[("BLKID_LIBRARY", "libblkid")],
        );
        registry.register_libs(
            "xmlsec",
            "XMLSEC",
            Some("xmlsec1"),
            &[
                ("XMLSEC_LIBRARY", "libxmlsec1"),
                ("XMLSEC_OPENSSL_LIBRARY", "libxmlsec1-openssl"),
            ],
        );

        registry
    }

    /// Register an override rule
    pub fn register(&mut self, name: &str, rule: DependencyRule) {
        self.rules.insert(name.to_string(), rule);
    }

    fn register_libs(
        &mut self,
        name: &str,
        prefix: &str,
        include_subdir: Option<&str>,
        libs: &[(&str, &str)],
    ) {
        self.register(
            name,
            DependencyRule {
                option_prefix: prefix.to_string(),
                include_subdir: include_subdir.map(|s| s.to_string()),
                libs: libs
                    .iter()
                    .map(|(key, stem)| LibRule {
                        option_key: key.to_string(),
                        file_stem: stem.to_string(),
                    })
                    .collect(),
            },
        );
    }

    /// The rule for `name`, falling back to the convention
    pub fn rule_for(&self, name: &str) -> DependencyRule {
        self.rules
            .get(name)
            .cloned()
            .unwrap_or_else(|| DependencyRule::conventional(name))
    }
}

/// A dependency resolved to concrete paths, scoped to one pipeline run
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    /// Symbolic name from the descriptor
    pub name: String,
    /// Header directory
    pub include_dir: PathBuf,
    /// Configure option key for the include directory, without the
    /// `:PATH` type suffix
    pub include_option_key: String,
    /// `(option key, library file)` pairs, one per exposed library
    pub libraries: Vec<(String, PathBuf)>,
}

/// Resolves descriptor dependency names under an install prefix
pub struct DependencyResolver {
    prefix: PathBuf,
    registry: DependencyRegistry,
}

impl DependencyResolver {
    /// Create a resolver for `prefix` with the built-in registry
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self::with_registry(prefix, DependencyRegistry::builtin())
    }

    /// Create a resolver with a caller-supplied registry
    pub fn with_registry(prefix: impl Into<PathBuf>, registry: DependencyRegistry) -> Self {
        Self {
            prefix: prefix.into(),
            registry,
        }
    }

    /// Resolve one dependency, checking every derived path exists on disk
    pub fn resolve(&self, name: &str) -> Result<ResolvedDependency> {
        let rule = self.registry.rule_for(name);

        let mut include_dir = self.prefix.join("include");
        if let Some(subdir) = &rule.include_subdir {
            include_dir = include_dir.join(subdir);
        }
        check_exists(name, &include_dir)?;

        let lib_dir = self.prefix.join("lib");
        let mut libraries = Vec::with_capacity(rule.libs.len());
        for lib in &rule.libs {
            let path = lib_dir.join(format!("{}.{}", lib.file_stem, platform_lib_ext()));
            check_exists(name, &path)?;
            libraries.push((lib.option_key.clone(), path));
        }

        debug!("Resolved dependency '{}' under {}", name, self.prefix.display());
        Ok(ResolvedDependency {
            name: name.to_string(),
            include_dir,
            include_option_key: format!("{}_INCLUDE_DIR", rule.option_prefix),
            libraries,
        })
    }

    /// Resolve every name, in parallel, returning results in input order
    ///
    /// Lookups are independent of each other (they only read pre-existing
    /// installed trees), so they fan out across the rayon pool; the
    /// collected vector still follows descriptor order.
    pub fn resolve_all(&self, names: &[String]) -> Result<Vec<ResolvedDependency>> {
        names
            .par_iter()
            .map(|name| self.resolve(name))
            .collect()
    }
}

fn check_exists(name: &str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::UnresolvedDependency {
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Install fake include/lib entries for `libs` under `prefix`
    fn install_fake(prefix: &Path, include_subdir: Option<&str>, libs: &[&str]) {
        let mut include = prefix.join("include");
        if let Some(subdir) = include_subdir {
            include = include.join(subdir);
        }
        fs::create_dir_all(&include).unwrap();
        let lib_dir = prefix.join("lib");
        fs::create_dir_all(&lib_dir).unwrap();
        for stem in libs {
            fs::write(
                lib_dir.join(format!("{stem}.{}", platform_lib_ext())),
                b"\x7fELF",
            )
            .unwrap();
        }
    }

    #[test]
    fn test_conventional_resolution() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), None, &["libpopt"]);

        let resolver = DependencyResolver::new(prefix.path());
        let dep = resolver.resolve("popt").unwrap();

        assert_eq!(dep.include_option_key, "POPT_INCLUDE_DIR");
        assert_eq!(dep.include_dir, prefix.path().join("include"));
        assert_eq!(dep.libraries.len(), 1);
        assert_eq!(dep.libraries[0].0, "POPT_LIBRARY");
        assert!(dep.libraries[0].1.ends_with(format!("libpopt.{}", platform_lib_ext())));
    }

    #[test]
    fn test_registry_override_include_subdir() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), Some("dbus-1.0"), &["libdbus-1"]);

        let resolver = DependencyResolver::new(prefix.path());
        let dep = resolver.resolve("dbus").unwrap();

        assert_eq!(dep.include_dir, prefix.path().join("include/dbus-1.0"));
        assert_eq!(dep.libraries[0].0, "DBUS_LIBRARIES");
    }

    #[test]
    fn test_multi_library_dependency() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), None, &["librpm", "librpmio"]);

        let resolver = DependencyResolver::new(prefix.path());
        let dep = resolver.resolve("rpm").unwrap();

        let keys: Vec<&str> = dep.libraries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["RPM_LIBRARY", "RPMIO_LIBRARY"]);
    }

    #[test]
    fn test_missing_path_names_dependency() {
        let prefix = tempfile::tempdir().unwrap();
        // Include dir exists, library does not.
        fs::create_dir_all(prefix.path().join("include")).unwrap();
        fs::create_dir_all(prefix.path().join("lib")).unwrap();

        let resolver = DependencyResolver::new(prefix.path());
        match resolver.resolve("curl").unwrap_err() {
            Error::UnresolvedDependency { name, path } => {
                assert_eq!(name, "curl");
                assert!(path.to_string_lossy().contains("libcurl"));
            }
            other => panic!("expected UnresolvedDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_all_preserves_order() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), None, &["libpcre2-8", "libcurl", "libyaml"]);

        let resolver = DependencyResolver::new(prefix.path());
        let names = vec![
            "pcre2".to_string(),
            "curl".to_string(),
            "libyaml".to_string(),
        ];
        let deps = resolver.resolve_all(&names).unwrap();

        let resolved: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(resolved, vec!["pcre2", "curl", "libyaml"]);
    }

    #[test]
    fn test_resolve_all_fails_on_any_missing() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), None, &["libcurl"]);

        let resolver = DependencyResolver::new(prefix.path());
        let names = vec!["curl".to_string(), "pcre2".to_string()];
        assert!(matches!(
            resolver.resolve_all(&names).unwrap_err(),
            Error::UnresolvedDependency { .. }
        ));
    }

    #[test]
    fn test_custom_registry_entry() {
        let prefix = tempfile::tempdir().unwrap();
        install_fake(prefix.path(), Some("python3.8"), &["libpython3.8"]);

        let mut registry = DependencyRegistry::builtin();
        registry.register(
            "python3",
            DependencyRule {
                option_prefix: "PYTHON".to_string(),
                include_subdir: Some("python3.8".to_string()),
                libs: vec![LibRule {
                    option_key: "PYTHON_LIBRARY".to_string(),
                    file_stem: "libpython3.8".to_string(),
                }],
            },
        );

        let resolver = DependencyResolver::with_registry(prefix.path(), registry);
        let dep = resolver.resolve("python3").unwrap();
        assert_eq!(dep.include_dir, prefix.path().join("include/python3.8"));
    }
}
