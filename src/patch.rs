// src/patch.rs

//! Unified-diff patch application over an extracted source tree
//!
//! Patches are applied in the order the descriptor lists them, each one
//! atomically: every file change in a patch is computed in memory first,
//! and nothing touches the tree until the whole patch applies cleanly. A
//! hunk conflict therefore leaves the source tree exactly as the previous
//! patch left it.
//!
//! A multi-file unified diff is split into per-file segments by tracking
//! hunk line counts from the `@@` headers, so a `--- ` line inside hunk
//! context is never mistaken for a new file header. Each segment is then
//! applied with diffy against the current file content.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// A named patch with its unified-diff payload
#[derive(Debug, Clone)]
pub struct Patch {
    /// Name the descriptor refers to this patch by
    pub name: String,
    /// Unified-diff text
    pub payload: String,
    /// Leading path components to strip from diff paths, as in `patch -pN`
    pub strip: usize,
    /// Environment overlay for this patch's application only; it is
    /// reported on [`AppliedPatch`] and never seen by later patches or
    /// the build steps
    pub env: BTreeMap<String, String>,
}

impl Patch {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            strip: 1,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Record of one successfully applied patch
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub name: String,
    /// Paths changed, relative to the source tree
    pub files: Vec<PathBuf>,
    /// Environment overlay this patch was applied with
    pub env: BTreeMap<String, String>,
}

/// One file's pending change, fully computed before any write
enum StagedChange {
    Write { path: PathBuf, content: String },
    Delete { path: PathBuf },
}

/// Applies patches to one source tree
pub struct PatchApplier {
    source_dir: PathBuf,
}

impl PatchApplier {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    /// Apply `patches` in order, stopping at the first conflict
    pub fn apply_all(&self, patches: &[Patch]) -> Result<Vec<AppliedPatch>> {
        let mut applied = Vec::with_capacity(patches.len());
        for patch in patches {
            applied.push(self.apply(patch)?);
        }
        Ok(applied)
    }

    /// Apply a single patch atomically
    pub fn apply(&self, patch: &Patch) -> Result<AppliedPatch> {
        let segments = split_segments(&patch.payload).map_err(|detail| Error::PatchConflict {
            patch: patch.name.clone(),
            detail,
        })?;
        if segments.is_empty() {
            return Err(Error::PatchConflict {
                patch: patch.name.clone(),
                detail: "payload contains no file segments".to_string(),
            });
        }

        // Stage every change in memory; nothing is written until all
        // segments applied cleanly.
        let mut staged = Vec::with_capacity(segments.len());
        let mut files = Vec::with_capacity(segments.len());
        for segment in &segments {
            let change = self.stage_segment(patch, segment)?;
            files.push(match &change {
                StagedChange::Write { path, .. } => path.clone(),
                StagedChange::Delete { path } => path.clone(),
            });
            staged.push(change);
        }

        self.commit(&patch.name, staged)?;
        info!(
            "Applied patch '{}' ({} file{})",
            patch.name,
            files.len(),
            if files.len() == 1 { "" } else { "s" }
        );

        Ok(AppliedPatch {
            name: patch.name.clone(),
            files,
            env: patch.env.clone(),
        })
    }

    fn stage_segment(&self, patch: &Patch, segment: &Segment) -> Result<StagedChange> {
        let conflict = |detail: String| Error::PatchConflict {
            patch: patch.name.clone(),
            detail,
        };

        let parsed = diffy::Patch::from_str(&segment.text)
            .map_err(|e| conflict(format!("malformed diff: {e}")))?;

        if segment.new_path.is_none() {
            // +++ /dev/null, whole-file deletion
            let rel = segment
                .old_path
                .as_deref()
                .ok_or_else(|| conflict("segment has no usable path".to_string()))?;
            let rel = strip_components(rel, patch.strip)
                .ok_or_else(|| conflict(format!("path '{rel}' too short for -p{}", patch.strip)))?;
            let full = self.resolve_target(&rel).map_err(&conflict)?;
            let base = fs::read_to_string(&full)
                .map_err(|e| conflict(format!("{}: {e}", rel.display())))?;
            diffy::apply(&base, &parsed)
                .map_err(|e| conflict(format!("{}: {e}", rel.display())))?;
            return Ok(StagedChange::Delete { path: rel });
        }

        let rel = segment.new_path.as_deref().unwrap_or_default();
        let rel = strip_components(rel, patch.strip)
            .ok_or_else(|| conflict(format!("path '{rel}' too short for -p{}", patch.strip)))?;
        let full = self.resolve_target(&rel).map_err(&conflict)?;

        // --- /dev/null means file creation, applied against empty input.
        let base = if segment.old_path.is_none() {
            String::new()
        } else {
            fs::read_to_string(&full).map_err(|e| conflict(format!("{}: {e}", rel.display())))?
        };

        let content = diffy::apply(&base, &parsed)
            .map_err(|e| conflict(format!("{}: {e}", rel.display())))?;
        Ok(StagedChange::Write { path: rel, content })
    }

    /// Write staged changes, rolling back already-written files if a
    /// later write fails
    fn commit(&self, patch_name: &str, staged: Vec<StagedChange>) -> Result<()> {
        let mut undo: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(staged.len());
        for change in &staged {
            let result = match change {
                StagedChange::Write { path, content } => {
                    let full = self.source_dir.join(path);
                    let original = fs::read_to_string(&full).ok();
                    undo.push((full.clone(), original));
                    if let Some(parent) = full.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&full, content)
                }
                StagedChange::Delete { path } => {
                    let full = self.source_dir.join(path);
                    let original = fs::read_to_string(&full).ok();
                    undo.push((full.clone(), original));
                    fs::remove_file(&full)
                }
            };
            if let Err(e) = result {
                debug!("Rolling back patch '{patch_name}' after write failure");
                for (full, original) in undo.into_iter().rev() {
                    match original {
                        Some(content) => {
                            let _ = fs::write(&full, content);
                        }
                        None => {
                            let _ = fs::remove_file(&full);
                        }
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Join `rel` onto the source tree, rejecting escapes
    fn resolve_target(&self, rel: &Path) -> std::result::Result<PathBuf, String> {
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(format!("path '{}' escapes the source tree", rel.display())),
            }
        }
        Ok(self.source_dir.join(rel))
    }
}

/// One per-file slice of a multi-file unified diff
struct Segment {
    /// Path from the `--- ` header, `None` for `/dev/null`
    old_path: Option<String>,
    /// Path from the `+++ ` header, `None` for `/dev/null`
    new_path: Option<String>,
    /// The segment text diffy parses, from `--- ` through the last hunk
    text: String,
}

/// Split a multi-file diff into per-file segments
///
/// Hunk line counts from `@@ -a,b +c,d @@` headers track whether the
/// scanner is inside hunk content, so context lines that happen to start
/// with `--- ` do not open a spurious segment. A hunk header that does
/// not parse is an error; dropping it would silently shrink the patch.
fn split_segments(payload: &str) -> std::result::Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut current: Option<(Option<String>, Option<String>, Vec<&str>)> = None;
    let mut old_left = 0usize;
    let mut new_left = 0usize;

    for line in payload.lines() {
        let in_hunk = old_left > 0 || new_left > 0;

        if !in_hunk && line.starts_with("--- ") {
            if let Some((old, new, lines)) = current.take() {
                segments.push(make_segment(old, new, lines));
            }
            current = Some((header_path(line), None, vec![line]));
            continue;
        }

        let Some((_, new_path, lines)) = current.as_mut() else {
            // Prologue before the first file header (git metadata,
            // commentary), skipped.
            continue;
        };

        if !in_hunk && line.starts_with("+++ ") {
            *new_path = header_path(line);
            lines.push(line);
            continue;
        }

        if !in_hunk {
            if line.starts_with("@@") {
                let Some((old, new)) = parse_hunk_counts(line) else {
                    return Err(format!("malformed hunk header '{line}'"));
                };
                old_left = old;
                new_left = new;
                lines.push(line);
            }
            // Non-hunk lines between files (git "diff --git", "index")
            // are dropped; diffy only wants headers and hunks.
            continue;
        }

        match line.as_bytes().first() {
            Some(b'-') => old_left = old_left.saturating_sub(1),
            Some(b'+') => new_left = new_left.saturating_sub(1),
            Some(b'\\') => {}
            _ => {
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            }
        }
        lines.push(line);
    }

    if let Some((old, new, lines)) = current.take() {
        segments.push(make_segment(old, new, lines));
    }
    Ok(segments)
}

fn make_segment(old_path: Option<String>, new_path: Option<String>, lines: Vec<&str>) -> Segment {
    let mut text = lines.join("\n");
    text.push('\n');
    Segment {
        old_path,
        new_path,
        text,
    }
}

/// Extract the path from a `--- ` or `+++ ` header line
fn header_path(line: &str) -> Option<String> {
    let rest = line.get(4..)?.trim_start();
    // Timestamps after a tab are part of the classic format.
    let path = rest.split(['\t', '\n']).next()?.trim();
    if path.is_empty() || path == "/dev/null" {
        None
    } else {
        Some(path.to_string())
    }
}

/// Parse `@@ -a,b +c,d @@` into `(b, d)` line counts, 1 when omitted
fn parse_hunk_counts(line: &str) -> Option<(usize, usize)> {
    if !line.starts_with("@@ ") {
        return None;
    }
    let body = line.strip_prefix("@@ ")?.split(" @@").next()?;
    let mut parts = body.split_whitespace();
    let old = range_count(parts.next()?.strip_prefix('-')?)?;
    let new = range_count(parts.next()?.strip_prefix('+')?)?;
    Some((old, new))
}

fn range_count(range: &str) -> Option<usize> {
    match range.split_once(',') {
        Some((_, count)) => count.parse().ok(),
        None => Some(1),
    }
}

/// Drop `strip` leading components from a diff path
fn strip_components(path: &str, strip: usize) -> Option<PathBuf> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    for _ in 0..strip {
        parts.next()?;
    }
    let rel: PathBuf = parts.collect();
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel)
    }
}
