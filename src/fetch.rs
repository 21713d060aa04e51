// src/fetch.rs

//! Source fetching, integrity verification, and extraction
//!
//! The fetcher turns a descriptor's source URL into an extracted working
//! tree: download (or copy, for local sources) into a staging file, verify
//! the SHA-256 against the descriptor's pin, then unpack in-process. A
//! failed verification removes the offending file so a rerun cannot pick up
//! a corrupted archive. No automatic retries - the caller owns retry
//! policy.

use crate::descriptor::ComponentDescriptor;
use crate::error::{Error, Result};
use crate::hash;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use xz2::read::XzDecoder;

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the source fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Root under which per-component working directories are created
    pub work_root: PathBuf,
    /// Timeout applied to each HTTP request
    pub http_timeout: Duration,
}

impl FetchConfig {
    /// Create a config with the default HTTP timeout
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            http_timeout: HTTP_TIMEOUT,
        }
    }
}

/// A fetched, verified, and extracted source
#[derive(Debug)]
pub struct FetchedSource {
    /// Per-component working directory (`<work_root>/<name>-<version>`)
    pub workdir: PathBuf,
    /// Root of the extracted source tree
    pub source_dir: PathBuf,
    /// The verified archive file inside the working directory
    pub archive_path: PathBuf,
}

/// Downloads and verifies source archives
pub struct SourceFetcher {
    config: FetchConfig,
    client: reqwest::blocking::Client,
}

impl SourceFetcher {
    /// Create a fetcher
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| Error::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Fetch, verify, and extract a descriptor's source
    ///
    /// The working directory is named deterministically from the component
    /// name and version; an existing directory from a previous run is
    /// removed first, so reruns with an identical descriptor reproduce the
    /// same location.
    pub fn fetch(&self, descriptor: &ComponentDescriptor) -> Result<FetchedSource> {
        descriptor.validate()?;
        let version = descriptor.version().ok_or_else(|| {
            Error::InvalidDescriptor(format!(
                "'{}' must pin a version to be fetched",
                descriptor.name()
            ))
        })?;
        let expected = descriptor.sha256().ok_or_else(|| {
            Error::InvalidDescriptor(format!(
                "'{}' must pin a sha256 to be fetched",
                descriptor.name()
            ))
        })?;

        let workdir = self
            .config
            .work_root
            .join(format!("{}-{}", descriptor.name(), version));
        if workdir.exists() {
            fs::remove_dir_all(&workdir)?;
        }
        fs::create_dir_all(&workdir)?;

        let archive_path = workdir.join(descriptor.archive_filename());
        let source_url = descriptor.source_url();

        self.retrieve(&source_url, &archive_path)?;

        if let Err(e) = hash::verify_file(&archive_path, expected) {
            let _ = fs::remove_file(&archive_path);
            return Err(Error::ChecksumMismatch {
                expected: e.expected,
                actual: e.actual,
            });
        }
        debug!("Verified {}: sha256 {}", archive_path.display(), expected);

        let extract_root = workdir.join("source");
        fs::create_dir_all(&extract_root)?;
        extract_archive(&archive_path, &extract_root)?;

        let source_dir = collapse_single_dir(&extract_root)?;
        info!(
            "Fetched {} {} into {}",
            descriptor.name(),
            version,
            source_dir.display()
        );

        Ok(FetchedSource {
            workdir,
            source_dir,
            archive_path,
        })
    }

    /// Retrieve a URL or local path into `dest`
    fn retrieve(&self, source: &str, dest: &Path) -> Result<()> {
        match Url::parse(source) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                self.download(source, dest)
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::Fetch(format!("invalid file URL: {source}")))?;
                copy_local(&path, dest)
            }
            _ => copy_local(Path::new(source), dest),
        }
    }

    /// Stream an HTTP response into `dest`
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading: {}", url);

        let mut response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    operation: format!("download of {url}"),
                    timeout: self.config.http_timeout,
                }
            } else {
                Error::Fetch(format!("failed to fetch {url}: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!("HTTP {} from {url}", response.status())));
        }

        let mut file = File::create(dest)?;
        io::copy(&mut response, &mut file).map_err(|e| {
            // Body-read timeouts arrive as an io::Error wrapping a
            // reqwest::Error, not as ErrorKind::TimedOut.
            let timed_out = e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout)
                || e.kind() == io::ErrorKind::TimedOut;
            if timed_out {
                Error::Timeout {
                    operation: format!("download of {url}"),
                    timeout: self.config.http_timeout,
                }
            } else {
                Error::Fetch(format!("failed to read response from {url}: {e}"))
            }
        })?;

        Ok(())
    }
}

/// Copy a local source archive into the staging location
fn copy_local(source: &Path, dest: &Path) -> Result<()> {
    debug!("Copying local source: {}", source.display());
    fs::copy(source, dest)
        .map_err(|e| Error::Fetch(format!("failed to copy {}: {e}", source.display())))?;
    Ok(())
}

/// Extract a tar archive, decompressing by filename extension
///
/// Supports `.tar.gz`/`.tgz`, `.tar.xz`/`.txz`, and plain `.tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let file = File::open(archive)?;
    let reader: Box<dyn io::Read> = if filename.ends_with(".tar.gz") || filename.ends_with(".tgz")
    {
        Box::new(GzDecoder::new(file))
    } else if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
        Box::new(XzDecoder::new(file))
    } else if filename.ends_with(".tar") {
        Box::new(file)
    } else {
        return Err(Error::Parse(format!("unknown archive format: {filename}")));
    };

    let mut tar = tar::Archive::new(reader);
    tar.unpack(dest)
        .map_err(|e| Error::Fetch(format!("failed to extract {filename}: {e}")))?;

    Ok(())
}

/// If extraction produced a single top-level directory, descend into it
///
/// Release tarballs conventionally wrap everything in `name-version/`.
fn collapse_single_dir(extract_root: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(extract_root)?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 {
        let only = entries[0].path();
        if only.is_dir() {
            return Ok(only);
        }
    }
    Ok(extract_root.to_path_buf())
}
