//! Orchestration for committing loop work inside the worktree.
//!
//! The commit message is mechanical (`<slug> <stage>[-r<round>]`) and the
//! resulting short hash is recorded in COMMITS. The record tolerates history
//! edits: if the previously recorded hash was amended or rebased away, the
//! new hash replaces it instead of appending.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::core::stage::commit_message;
use crate::io::git::Git;
use crate::io::meta::write_meta;
use crate::io::safety::authorized_worktree;
use crate::resolve::resolve_target;

/// Length of recorded short hashes; long enough that collisions in one
/// repository are not a practical concern.
const SHORT_HASH_LEN: usize = 12;

/// Outcome of `agl commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub hash: String,
    pub message: String,
    /// True when the previous hash was amended away and got replaced.
    pub replaced: bool,
    pub worktree: PathBuf,
}

/// Commit everything in the worktree with the mechanical stage message.
pub fn commit_loop(root: &Path, dir: Option<&Path>) -> Result<CommitOutcome> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;
    let mut target = resolve_target(&root, dir, None)?;
    target.meta.ensure_main_root(&root)?;

    let worktree = authorized_worktree(&target.meta, &root, &target.paths)?;
    if !worktree.is_dir() {
        bail!(
            "worktree {} is missing (the loop was merged or dropped)",
            worktree.display()
        );
    }

    let wt_git = Git::new(&worktree);
    let current = wt_git.current_branch()?;
    if current != target.meta.branch {
        bail!(
            "worktree is on branch '{current}' but the loop owns '{}' (refusing to commit)",
            target.meta.branch
        );
    }
    if !wt_git.is_dirty()? {
        bail!("nothing to commit in {}", worktree.display());
    }

    let message = commit_message(
        &target.meta.slug,
        &target.meta.last_stage,
        target.meta.round,
    );
    wt_git.add_all()?;
    if !wt_git.commit_staged(&message)? {
        bail!("nothing to commit in {}", worktree.display());
    }
    let hash = wt_git.head_short_sha(SHORT_HASH_LEN)?;
    debug!(hash = %hash, message = %message, "loop commit created");

    let replaced = match target.meta.commits.last_mut() {
        Some(previous) if !wt_git.is_ancestor_of_head(previous)? => {
            info!(stale = %previous, new = %hash, "previous hash amended away, replacing");
            *previous = hash.clone();
            true
        }
        _ => {
            target.meta.commits.push(hash.clone());
            false
        }
    };
    target.meta.apply_to(&mut target.file)?;
    write_meta(&target.paths.meta_path(), &target.file)?;

    info!(hash = %hash, message = %message, "commit recorded");
    Ok(CommitOutcome {
        hash,
        message,
        replaced,
        worktree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::Stage;
    use crate::init::{InitOptions, init_loop};
    use crate::io::meta::{LoopMeta, load_meta};
    use crate::stage::{StageOptions, run_stage};
    use crate::test_support::{TestRepo, git};

    fn init(repo: &TestRepo) -> crate::init::InitOutcome {
        let opts = InitOptions {
            slug: "add-auth".to_string(),
            plan: repo.write_plan().expect("plan"),
            task: None,
            context: Vec::new(),
        };
        init_loop(repo.root(), &opts).expect("init")
    }

    fn run(repo: &TestRepo, stage: Stage) {
        let opts = StageOptions {
            stage,
            dir: None,
            plans: Vec::new(),
            agent: Vec::new(),
        };
        run_stage(repo.root(), &opts).expect("stage");
    }

    fn loaded_meta(loop_dir: &Path) -> LoopMeta {
        let file = load_meta(&loop_dir.join(".agl")).expect("meta");
        LoopMeta::from_file(&file).expect("typed view")
    }

    #[test]
    fn clean_worktree_is_a_fatal_nothing_to_commit() {
        let repo = TestRepo::new().expect("repo");
        init(&repo);
        let err = commit_loop(repo.root(), None).unwrap_err();
        assert!(err.to_string().contains("nothing to commit"));
    }

    #[test]
    fn commit_appends_hash_and_uses_stage_message() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo);
        run(&repo, Stage::Work);

        std::fs::write(outcome.worktree.join("auth.rs"), "mod auth;\n").expect("edit");
        let first = commit_loop(repo.root(), None).expect("commit");
        assert_eq!(first.message, "add-auth work");
        assert!(!first.replaced);

        let last = git(&outcome.worktree, &["log", "-1", "--pretty=%B"]).expect("log");
        assert_eq!(last.trim(), "add-auth work");

        std::fs::write(outcome.worktree.join("auth.rs"), "mod auth; // v2\n").expect("edit");
        let second = commit_loop(repo.root(), None).expect("commit");
        let meta = loaded_meta(&outcome.loop_dir);
        assert_eq!(meta.commits, vec![first.hash, second.hash]);
    }

    #[test]
    fn amended_hash_is_replaced_not_appended() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo);
        run(&repo, Stage::Work);

        std::fs::write(outcome.worktree.join("auth.rs"), "v1\n").expect("edit");
        let first = commit_loop(repo.root(), None).expect("commit");

        git(&outcome.worktree, &["commit", "--amend", "-m", "rewritten"]).expect("amend");

        std::fs::write(outcome.worktree.join("auth.rs"), "v2\n").expect("edit");
        let second = commit_loop(repo.root(), None).expect("commit");
        assert!(second.replaced);

        let meta = loaded_meta(&outcome.loop_dir);
        assert_eq!(meta.commits, vec![second.hash.clone()]);
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn round_suffix_appears_after_fix_advances_the_round() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo);
        run(&repo, Stage::Fix);

        std::fs::write(outcome.worktree.join("auth.rs"), "fixed\n").expect("edit");
        let committed = commit_loop(repo.root(), None).expect("commit");
        assert_eq!(committed.message, "add-auth fix-r2");
    }

    #[test]
    fn wrong_branch_in_worktree_is_refused() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init(&repo);
        git(&outcome.worktree, &["checkout", "-b", "rogue"]).expect("switch");
        std::fs::write(outcome.worktree.join("auth.rs"), "x\n").expect("edit");
        let err = commit_loop(repo.root(), None).unwrap_err();
        assert!(err.to_string().contains("refusing to commit"));
    }
}
