//! Context snapshots: immutable copies of plan/context inputs.
//!
//! Inputs are copied into the loop's `context/` directory at scaffold time so
//! later stages read what the loop was started with, not whatever the
//! caller's working copy has mutated into. Existing snapshots are never
//! overwritten; a changed input gets a numbered sibling.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Snapshot `source` into `context_dir` under its own file name.
///
/// Re-snapshotting identical content is a no-op returning the existing copy;
/// differing content lands next to it as `<stem>-2.<ext>`, `<stem>-3.<ext>`, …
pub fn snapshot_file(context_dir: &Path, source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("context input {} has no file name", source.display()))?;
    snapshot_named(context_dir, source, name)
}

/// Snapshot `source` into `context_dir` under a fixed name.
pub fn snapshot_named(context_dir: &Path, source: &Path, name: &str) -> Result<PathBuf> {
    let bytes =
        fs::read(source).with_context(|| format!("read context input {}", source.display()))?;
    fs::create_dir_all(context_dir)
        .with_context(|| format!("create directory {}", context_dir.display()))?;

    let (stem, ext) = split_name(name);
    let mut serial = 1u32;
    loop {
        let candidate_name = if serial == 1 {
            name.to_string()
        } else {
            match ext {
                Some(ext) => format!("{stem}-{serial}.{ext}"),
                None => format!("{stem}-{serial}"),
            }
        };
        let target = context_dir.join(&candidate_name);
        if !target.exists() {
            fs::write(&target, &bytes)
                .with_context(|| format!("write snapshot {}", target.display()))?;
            debug!(source = %source.display(), target = %target.display(), "snapshotted input");
            return Ok(target);
        }
        let existing = fs::read(&target)
            .with_context(|| format!("read existing snapshot {}", target.display()))?;
        if existing == bytes {
            debug!(target = %target.display(), "input already snapshotted");
            return Ok(target);
        }
        serial += 1;
        if serial > 1000 {
            bail!("too many snapshot revisions for {name} in {}", context_dir.display());
        }
    }
}

/// All snapshot paths except the named plan, absolute, sorted by file name.
pub fn list_context_files(context_dir: &Path, plan_name: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = match fs::read_dir(context_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("read context directory {}", context_dir.display()));
        }
    };
    for entry in entries {
        let entry = entry
            .with_context(|| format!("read context directory {}", context_dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if entry.file_name().to_str() == Some(plan_name) {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
