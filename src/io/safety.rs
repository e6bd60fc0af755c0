//! Path safety checks for metadata-derived worktree paths.
//!
//! The worktree path stored in a loop record is input, not truth: records can
//! be hand-edited, copied between machines, or corrupted. Every command that
//! deletes a tree, runs destructive git against a path, or executes the agent
//! inside one must first prove the path is exactly the one this loop is
//! authorized to touch. Deviations are refused outright, never repaired.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::layout::{self, LoopPaths, WORKTREE_LEAF};
use crate::io::git::Git;
use crate::io::meta::LoopMeta;

/// Validate the recorded worktree path and return it in absolute form.
///
/// Checks, in order: placement mode against the path's shape, byte-exact
/// equality with the derived expected path, symlink containment under the
/// external base, and membership in the primary repository. Holds no state;
/// validating the same record twice gives the same answer.
pub fn authorized_worktree(
    meta: &LoopMeta,
    repo_root: &Path,
    paths: &LoopPaths,
) -> Result<PathBuf> {
    let resolved = check_shape(meta, repo_root, &paths.dir_name)?;

    if meta.is_external() {
        check_symlink_containment(meta, &resolved)?;
    }

    if resolved.exists() {
        check_repo_membership(repo_root, &resolved)?;
    }

    debug!(worktree = %resolved.display(), "worktree path authorized");
    Ok(resolved)
}

/// The external leaf directory a loop owns, derived (never read from the
/// record) so teardown deletes only what init would have created.
pub fn authorized_external_leaf(
    meta: &LoopMeta,
    repo_root: &Path,
    paths: &LoopPaths,
) -> Result<Option<PathBuf>> {
    if !meta.is_external() {
        return Ok(None);
    }
    let base = declared_base(meta)?;
    let repo_name = repo_name(repo_root)?;
    Ok(Some(layout::external_leaf_dir(
        base,
        repo_name,
        &paths.dir_name,
    )))
}

/// Mode classification and byte-exact path equality, no filesystem access.
fn check_shape(meta: &LoopMeta, repo_root: &Path, dir_name: &str) -> Result<PathBuf> {
    let recorded = Path::new(&meta.worktree);

    if recorded.is_absolute() {
        if !meta.is_external() {
            bail!(
                "worktree path '{}' is absolute but the record declares no external mode",
                meta.worktree
            );
        }
        let base = declared_base(meta)?;
        if !recorded.starts_with(base) || recorded == base {
            bail!(
                "worktree path '{}' is not strictly under the declared base '{}'",
                meta.worktree,
                base.display()
            );
        }
        if recorded.file_name().and_then(|n| n.to_str()) != Some(WORKTREE_LEAF) {
            bail!(
                "worktree path '{}' does not end in the fixed '{WORKTREE_LEAF}' segment",
                meta.worktree
            );
        }
        let expected = layout::external_worktree(base, repo_name(repo_root)?, dir_name);
        if recorded.as_os_str() != expected.as_os_str() {
            bail!(
                "worktree path '{}' does not match the expected '{}' (refusing to guess)",
                meta.worktree,
                expected.display()
            );
        }
        return Ok(expected);
    }

    if meta.is_external() {
        bail!(
            "worktree path '{}' is relative but the record declares external mode",
            meta.worktree
        );
    }
    if recorded
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        bail!("worktree path '{}' contains a '..' segment", meta.worktree);
    }
    let prefix = format!("{}/", layout::WORK_ROOT);
    if !meta.worktree.starts_with(&prefix) {
        bail!(
            "worktree path '{}' is outside '{}'",
            meta.worktree,
            layout::WORK_ROOT
        );
    }
    let expected = layout::internal_worktree_rel(dir_name);
    if meta.worktree != expected {
        bail!(
            "worktree path '{}' does not match the expected '{expected}' (refusing to guess)",
            meta.worktree
        );
    }
    Ok(repo_root.join(&meta.worktree))
}

/// With both directories on disk, the symlink-resolved worktree must still be
/// inside the symlink-resolved base.
fn check_symlink_containment(meta: &LoopMeta, worktree: &Path) -> Result<()> {
    let base = declared_base(meta)?;
    if !worktree.exists() || !base.exists() {
        return Ok(());
    }
    let resolved_worktree = fs::canonicalize(worktree)
        .with_context(|| format!("resolve worktree {}", worktree.display()))?;
    let resolved_base =
        fs::canonicalize(base).with_context(|| format!("resolve base {}", base.display()))?;
    if !resolved_worktree.starts_with(&resolved_base) {
        bail!(
            "worktree '{}' resolves to '{}', outside the declared base '{}'",
            worktree.display(),
            resolved_worktree.display(),
            resolved_base.display()
        );
    }
    Ok(())
}

/// The checkout at `worktree` must share this repository's common git dir.
fn check_repo_membership(repo_root: &Path, worktree: &Path) -> Result<()> {
    let ours = fs::canonicalize(Git::new(repo_root).git_common_dir()?)
        .context("resolve repository git dir")?;
    let theirs = Git::new(worktree)
        .git_common_dir()
        .with_context(|| format!("worktree '{}' is not a git checkout", worktree.display()))?;
    let theirs = fs::canonicalize(&theirs)
        .with_context(|| format!("resolve git dir of {}", worktree.display()))?;
    if ours != theirs {
        bail!(
            "worktree '{}' does not belong to this repository",
            worktree.display()
        );
    }
    Ok(())
}

fn declared_base(meta: &LoopMeta) -> Result<&Path> {
    match &meta.worktree_base {
        Some(base) => Ok(base.as_path()),
        None => bail!("record declares external mode but carries no base path"),
    }
}

fn repo_name(repo_root: &Path) -> Result<&str> {
    repo_root
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("repository root {} has no name", repo_root.display()))
}
