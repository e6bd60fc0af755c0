//! Orchestration for abandoning a loop.
//!
//! Drop removes the worktree (dirty or not), the branch, and in external mode
//! the loop's leaf directory. The loop directory with its prompts and reports
//! stays behind unless `--all` asks for it to go too. Every removal target is
//! derived from validated metadata; a loop that fails path validation is never
//! partially torn down.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::io::git::Git;
use crate::io::safety::{authorized_external_leaf, authorized_worktree};
use crate::resolve::resolve_target;

/// Inputs to `agl drop`.
#[derive(Debug, Clone, Default)]
pub struct DropOptions {
    pub slug: Option<String>,
    pub dir: Option<PathBuf>,
    /// Also delete the loop directory (prompts, reports, snapshots).
    pub all: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
}

/// What `agl drop` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropOutcome {
    pub branch: String,
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub loop_dir_removed: bool,
}

/// Abandon a loop. Returns `None` when the operator declines the confirmation.
pub fn drop_loop(root: &Path, opts: &DropOptions) -> Result<Option<DropOutcome>> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;
    let git = Git::new(&root);

    let target = resolve_target(&root, opts.dir.as_deref(), opts.slug.as_deref())?;
    target.meta.ensure_main_root(&root)?;
    let branch = target.meta.branch.clone();

    let worktree = authorized_worktree(&target.meta, &root, &target.paths)?;
    let leaf = authorized_external_leaf(&target.meta, &root, &target.paths)?;

    if !opts.yes && !confirm(&plan_summary(&target, &worktree, leaf.as_deref(), opts.all))? {
        info!(branch = %branch, "drop cancelled");
        return Ok(None);
    }

    let worktree_removed = git.worktree_remove(&worktree)?;
    git.worktree_prune()?;

    let branch_deleted = if git.branch_exists(&branch)? {
        git.branch_delete(&branch)?;
        true
    } else {
        warn!(branch = %branch, "branch was already gone");
        false
    };

    if let Some(leaf) = &leaf
        && leaf.exists()
    {
        fs::remove_dir_all(leaf)
            .with_context(|| format!("remove leaf directory {}", leaf.display()))?;
    }

    let loop_dir_removed = if opts.all {
        fs::remove_dir_all(&target.paths.loop_dir).with_context(|| {
            format!("remove loop directory {}", target.paths.loop_dir.display())
        })?;
        true
    } else {
        false
    };

    info!(branch = %branch, all = opts.all, "loop dropped");
    Ok(Some(DropOutcome {
        branch,
        worktree_removed,
        branch_deleted,
        loop_dir_removed,
    }))
}

fn plan_summary(
    target: &crate::resolve::LoopRef,
    worktree: &Path,
    leaf: Option<&Path>,
    all: bool,
) -> String {
    let mut lines = vec![
        format!("  worktree  {}", worktree.display()),
        format!("  branch    {}", target.meta.branch),
    ];
    if let Some(leaf) = leaf {
        lines.push(format!("  directory {}", leaf.display()));
    }
    if all {
        lines.push(format!("  loop dir  {}", target.paths.loop_dir.display()));
    }
    format!("This will remove:\n{}", lines.join("\n"))
}

fn confirm(summary: &str) -> Result<bool> {
    let mut stderr = std::io::stderr().lock();
    writeln!(stderr, "{summary}").context("write confirmation prompt")?;
    write!(stderr, "Proceed? [y/N] ").context("write confirmation prompt")?;
    stderr.flush().context("flush confirmation prompt")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation answer")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::{InitOptions, init_loop};
    use crate::resolve::list_loops;
    use crate::test_support::TestRepo;

    fn init(repo: &TestRepo, slug: &str) -> crate::init::InitOutcome {
        let opts = InitOptions {
            slug: slug.to_string(),
            plan: repo.write_plan().expect("plan"),
            task: None,
            context: Vec::new(),
        };
        init_loop(repo.root(), &opts).expect("init")
    }

    fn yes() -> DropOptions {
        DropOptions {
            yes: true,
            ..DropOptions::default()
        }
    }

    #[test]
    fn drop_removes_worktree_and_branch_but_keeps_loop_dir() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo, "add-auth");
        // A dirty worktree must not block abandonment.
        std::fs::write(outcome.worktree.join("wip.rs"), "wip\n").expect("edit");

        let dropped = drop_loop(repo.root(), &yes())
            .expect("drop")
            .expect("confirmed");
        assert!(dropped.worktree_removed);
        assert!(dropped.branch_deleted);
        assert!(!dropped.loop_dir_removed);

        assert!(!outcome.worktree.exists());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.is_empty());
        assert!(outcome.loop_dir.join(".agl").is_file());
    }

    #[test]
    fn drop_all_removes_the_loop_directory_too() {
        let repo = TestRepo::new().expect("repo");
        init(&repo, "add-auth");

        drop_loop(
            repo.root(),
            &DropOptions {
                all: true,
                yes: true,
                ..DropOptions::default()
            },
        )
        .expect("drop")
        .expect("confirmed");

        assert!(list_loops(repo.root()).expect("list").is_empty());
    }

    #[test]
    fn drop_tolerates_an_already_missing_worktree() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo, "add-auth");
        std::fs::remove_dir_all(&outcome.worktree).expect("remove");

        let dropped = drop_loop(repo.root(), &yes())
            .expect("drop")
            .expect("confirmed");
        assert!(!dropped.worktree_removed);
        assert!(dropped.branch_deleted);
    }

    #[test]
    fn drop_external_loop_removes_the_leaf_directory() {
        let repo = TestRepo::new().expect("repo");
        let base = repo.outside_dir().join("trees");
        repo.configure_external_base(&base).expect("config");
        let outcome = init(&repo, "add-auth");
        let leaf = outcome.worktree.parent().expect("leaf").to_path_buf();
        assert!(leaf.is_dir());

        drop_loop(repo.root(), &yes())
            .expect("drop")
            .expect("confirmed");
        assert!(!leaf.exists());
    }

    #[test]
    fn drop_refuses_tampered_metadata() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo, "add-auth");

        let meta_path = outcome.loop_dir.join(".agl");
        let tampered = std::fs::read_to_string(&meta_path)
            .expect("read")
            .lines()
            .map(|line| {
                if line.starts_with("WORKTREE=") {
                    "WORKTREE=work/agent-loop/../../src".to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&meta_path, tampered + "\n").expect("write");

        let err = drop_loop(repo.root(), &yes()).unwrap_err();
        assert!(format!("{err:#}").contains("'..' segment"), "got: {err:#}");
        // Nothing was torn down.
        assert!(outcome.worktree.is_dir());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.contains("agl/add-auth"));
    }
}
