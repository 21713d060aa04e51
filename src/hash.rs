// src/hash.rs

//! SHA-256 digests for source integrity and artifact comparison
//!
//! Two jobs: verifying a fetched archive against the descriptor's pinned
//! hash, and digesting whole directory trees so callers (and tests) can
//! compare artifact trees for byte-identity without diffing every file.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

/// A digest mismatch between expected and computed values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sha256 mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for VerifyError {}

/// Compute the SHA-256 hash of a byte slice as lowercase hex
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hash of everything read from `reader`
///
/// Streams in 8 KiB chunks so large archives never sit in memory.
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 hash of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Verify a file matches an expected hash (case-insensitive hex)
pub fn verify_file(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = sha256_file(path).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<file read error>".to_string(),
    })?;

    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Check that a string looks like a SHA-256 hex digest
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Digest a directory tree: relative paths plus file contents, in sorted
/// walk order
///
/// Two trees with the same digest hold byte-identical files under identical
/// relative paths. Symlinks hash their target path rather than following it.
pub fn tree_digest(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            hasher.update(b"dir");
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            hasher.update(b"link");
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let mut file = std::fs::File::open(entry.path())?;
            let content_hash = sha256_reader(&mut file)?;
            hasher.update(content_hash.as_bytes());
        }
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
