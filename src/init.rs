//! Orchestration for creating a loop.
//!
//! Init is the only command that creates state in three places at once (loop
//! directory, branch, worktree), so it is also the only one with a rollback
//! path: any failure after the loop directory exists tears the partial state
//! back down before the error surfaces.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::core::layout::{self, LoopPaths};
use crate::core::slug::{branch_for, validate_slug};
use crate::io::config::load_config;
use crate::io::git::Git;
use crate::io::meta::{LoopMeta, MetaFile, MODE_EXTERNAL, write_meta};
use crate::io::snapshot::{snapshot_file, snapshot_named};

/// Inputs to `agl init`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub slug: String,
    pub plan: PathBuf,
    pub task: Option<PathBuf>,
    pub context: Vec<PathBuf>,
}

/// Outcome of `agl init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub slug: String,
    pub branch: String,
    pub loop_dir: PathBuf,
    pub worktree: PathBuf,
    pub external: bool,
}

/// Create the loop: directory, metadata, branch at HEAD, worktree.
pub fn init_loop(root: &Path, opts: &InitOptions) -> Result<InitOutcome> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;
    debug!(root = %root.display(), slug = %opts.slug, "initializing loop");
    let git = Git::new(&root);

    validate_slug(&opts.slug)?;
    if !opts.plan.is_file() {
        bail!("plan file {} does not exist", opts.plan.display());
    }
    fs::read_to_string(&opts.plan)
        .with_context(|| format!("read plan {}", opts.plan.display()))?;

    if !git.is_primary_worktree()? {
        bail!(
            "run from the primary worktree, not a linked one ({})",
            root.display()
        );
    }
    // Query with the trailing slash: a directory-only ignore entry
    // ("work/agent-loop/") matches nothing else before the directory exists.
    if !git.is_ignored(&format!("{}/", layout::WORK_ROOT))? {
        bail!(
            "'{}' is not git-ignored (add '{}/' to .gitignore first)",
            layout::WORK_ROOT,
            layout::WORK_ROOT
        );
    }

    let branch = branch_for(&opts.slug);
    if git.branch_exists(&branch)? {
        bail!("branch '{branch}' already exists (merge or drop the previous loop first)");
    }

    let config = load_config(&root)?;
    let stamp = layout::format_stamp(&Local::now());
    let dir_name = layout::loop_dir_name(&stamp, &opts.slug);
    let paths = LoopPaths::new(&root, &dir_name);
    if paths.loop_dir.exists() {
        bail!(
            "loop directory {} already exists (retry in a second)",
            paths.loop_dir.display()
        );
    }

    let plan = Plan::derive(&root, &paths, &branch, config.worktree_base.as_deref())?;

    match build(&git, &root, &paths, opts, &plan) {
        Ok(outcome) => {
            info!(
                slug = %outcome.slug,
                branch = %outcome.branch,
                worktree = %outcome.worktree.display(),
                "loop initialized"
            );
            Ok(outcome)
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "init failed, rolling back partial state");
            rollback(&git, &paths, &plan);
            Err(err)
        }
    }
}

/// Everything init will create, derived before any side effect.
struct Plan {
    branch: String,
    worktree_record: String,
    worktree_abs: PathBuf,
    base: Option<PathBuf>,
    external_leaf: Option<PathBuf>,
}

impl Plan {
    fn derive(
        root: &Path,
        paths: &LoopPaths,
        branch: &str,
        base: Option<&Path>,
    ) -> Result<Self> {
        match base {
            Some(base) => {
                let repo_name = root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("repository root {} has no name", root.display()))?;
                let worktree = layout::external_worktree(base, repo_name, &paths.dir_name);
                Ok(Self {
                    branch: branch.to_string(),
                    worktree_record: worktree.display().to_string(),
                    worktree_abs: worktree,
                    base: Some(base.to_path_buf()),
                    external_leaf: Some(layout::external_leaf_dir(
                        base,
                        repo_name,
                        &paths.dir_name,
                    )),
                })
            }
            None => Ok(Self {
                branch: branch.to_string(),
                worktree_record: layout::internal_worktree_rel(&paths.dir_name),
                worktree_abs: paths.internal_tree_dir(),
                base: None,
                external_leaf: None,
            }),
        }
    }
}

fn build(
    git: &Git,
    root: &Path,
    paths: &LoopPaths,
    opts: &InitOptions,
    plan: &Plan,
) -> Result<InitOutcome> {
    for dir in [
        paths.loop_dir.clone(),
        paths.prompts_dir(),
        paths.output_dir(),
        paths.context_dir(),
    ] {
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let plan_snapshot = snapshot_named(&paths.context_dir(), &opts.plan, "plan.md")?;
    if let Some(task) = &opts.task {
        snapshot_named(&paths.context_dir(), task, "task.md")?;
    }
    for input in &opts.context {
        snapshot_file(&paths.context_dir(), input)?;
    }
    let plan_rel = plan_snapshot
        .strip_prefix(root)
        .with_context(|| format!("plan snapshot {} outside root", plan_snapshot.display()))?;

    let mode = plan.base.as_ref().map(|_| MODE_EXTERNAL.to_string());
    let meta = LoopMeta {
        slug: opts.slug.clone(),
        branch: plan.branch.clone(),
        worktree: plan.worktree_record.clone(),
        worktree_mode: mode,
        worktree_base: plan.base.clone(),
        main_root: root.to_path_buf(),
        round: 1,
        last_stage: "init".to_string(),
        commits: Vec::new(),
        plan_path: plan_rel.display().to_string(),
    };
    let mut file = MetaFile::new();
    meta.apply_to(&mut file)?;
    write_meta(&paths.meta_path(), &file)?;

    git.branch_create(&plan.branch)?;

    if let Some(leaf) = &plan.external_leaf {
        fs::create_dir_all(leaf).with_context(|| format!("create {}", leaf.display()))?;
    }
    git.worktree_add(&plan.worktree_abs, &plan.branch)?;

    Ok(InitOutcome {
        slug: opts.slug.clone(),
        branch: plan.branch.clone(),
        loop_dir: paths.loop_dir.clone(),
        worktree: plan.worktree_abs.clone(),
        external: plan.external_leaf.is_some(),
    })
}

/// Best-effort teardown of whatever `build` got through.
fn rollback(git: &Git, paths: &LoopPaths, plan: &Plan) {
    if let Err(err) = git.worktree_remove(&plan.worktree_abs) {
        warn!(error = %format!("{err:#}"), "rollback: worktree remove failed");
    }
    if let Err(err) = git.worktree_prune() {
        warn!(error = %format!("{err:#}"), "rollback: worktree prune failed");
    }
    if let Some(leaf) = &plan.external_leaf
        && leaf.exists()
        && let Err(err) = fs::remove_dir_all(leaf)
    {
        warn!(leaf = %leaf.display(), error = %err, "rollback: leaf removal failed");
    }
    match git.branch_exists(&plan.branch) {
        Ok(true) => {
            if let Err(err) = git.branch_delete(&plan.branch) {
                warn!(error = %format!("{err:#}"), "rollback: branch delete failed");
            }
        }
        Ok(false) => {}
        Err(err) => warn!(error = %format!("{err:#}"), "rollback: branch check failed"),
    }
    if paths.loop_dir.exists()
        && let Err(err) = fs::remove_dir_all(&paths.loop_dir)
    {
        warn!(dir = %paths.loop_dir.display(), error = %err, "rollback: loop dir removal failed");
    }
}
