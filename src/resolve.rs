//! Resolving which loop a command targets.
//!
//! Commands accept an explicit `--dir`, a slug, or nothing; the default is
//! the most recently created loop whose worktree still exists. Resolution
//! only picks the loop; path-safety validation happens in the command once
//! the target is fixed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::core::layout::{self, LoopPaths};
use crate::io::meta::{LoopMeta, MetaFile, load_meta};

/// A resolved loop: its layout plus the loaded metadata record.
#[derive(Debug)]
pub struct LoopRef {
    pub paths: LoopPaths,
    pub file: MetaFile,
    pub meta: LoopMeta,
}

/// Load and type-check the metadata of a loop directory.
pub fn load_loop(paths: LoopPaths) -> Result<LoopRef> {
    let file = load_meta(&paths.meta_path())
        .with_context(|| format!("loop directory {}", paths.loop_dir.display()))?;
    let meta = LoopMeta::from_file(&file)
        .with_context(|| format!("loop directory {}", paths.loop_dir.display()))?;
    Ok(LoopRef { paths, file, meta })
}

/// All loop directories under the work root, most recent first.
pub fn list_loops(repo_root: &Path) -> Result<Vec<LoopPaths>> {
    let work_root = repo_root.join(layout::WORK_ROOT);
    let entries = match fs::read_dir(&work_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", work_root.display()));
        }
    };

    let mut loops = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", work_root.display()))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(paths) = LoopPaths::from_dir(entry.path()) else {
            continue;
        };
        if !paths.meta_path().is_file() {
            continue;
        }
        loops.push(paths);
    }
    // Stamp prefix makes lexicographic order chronological.
    loops.sort_by(|a, b| b.dir_name.cmp(&a.dir_name));
    Ok(loops)
}

/// Pick the loop a command targets.
pub fn resolve_target(
    repo_root: &Path,
    dir: Option<&Path>,
    slug: Option<&str>,
) -> Result<LoopRef> {
    if let Some(dir) = dir {
        let dir = absolutize(dir)?;
        let paths = LoopPaths::from_dir(dir.clone())
            .ok_or_else(|| anyhow!("'{}' is not a loop directory name", dir.display()))?;
        if !paths.meta_path().is_file() {
            bail!(
                "no loop metadata at {} (expected {})",
                dir.display(),
                paths.meta_path().display()
            );
        }
        return load_loop(paths);
    }

    let loops = list_loops(repo_root)?;
    if let Some(slug) = slug {
        let found = loops.into_iter().find(|paths| {
            layout::parse_loop_dir_name(&paths.dir_name)
                .is_some_and(|(_, s)| s == slug)
        });
        return match found {
            Some(paths) => load_loop(paths),
            None => Err(anyhow!(
                "no loop found for slug '{slug}' under {}",
                repo_root.join(layout::WORK_ROOT).display()
            )),
        };
    }

    for paths in loops {
        let loop_ref = load_loop(paths)?;
        let probe = recorded_worktree_path(&loop_ref.meta, repo_root);
        if probe.is_dir() {
            debug!(dir = %loop_ref.paths.loop_dir.display(), "resolved most recent live loop");
            return Ok(loop_ref);
        }
        debug!(dir = %loop_ref.paths.loop_dir.display(), "skipping loop without live worktree");
    }
    Err(anyhow!(
        "no live loop found (run `agl init <slug> --plan <plan>` first, or pass --dir)"
    ))
}

/// Where the record claims the worktree is, unvalidated. For liveness probes
/// and listings only; destructive paths go through `io::safety`.
pub fn recorded_worktree_path(meta: &LoopMeta, repo_root: &Path) -> PathBuf {
    let recorded = Path::new(&meta.worktree);
    if recorded.is_absolute() {
        recorded.to_path_buf()
    } else {
        repo_root.join(recorded)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    Ok(cwd.join(path))
}
