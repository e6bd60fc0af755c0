//! Orchestration for the squash-merge terminal transition.
//!
//! The squash lands on whatever branch the operator is currently on; the
//! loop's worktree, branch, and (in external mode) leaf directory are deleted
//! only after the commit succeeds. A conflicting squash stays staged for
//! manual resolution and the dirty-tree preflight stops a second invocation
//! from stacking another squash on top.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::io::agent::AgentCmd;
use crate::io::git::Git;
use crate::io::prompt::write_merge_prompt;
use crate::io::safety::{authorized_external_leaf, authorized_worktree};
use crate::resolve::resolve_target;

/// Inputs to `agl merge`.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub slug: Option<String>,
    pub dir: Option<PathBuf>,
    /// Keep the worktree and branch after a successful merge.
    pub no_delete: bool,
    /// Agent argv for drafting the commit message; empty skips drafting.
    pub agent: Vec<String>,
}

/// Outcome of `agl merge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub branch: String,
    pub into: String,
    pub deleted: bool,
}

/// Squash-merge the loop branch into the caller's current branch.
///
/// The agent argv is checked before anything else, so a usage error leaves
/// both trees untouched.
pub fn merge_loop(root: &Path, opts: &MergeOptions) -> Result<MergeOutcome> {
    let agent = AgentCmd::parse(&opts.agent)?;
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;
    let git = Git::new(&root);

    let target = resolve_target(&root, opts.dir.as_deref(), opts.slug.as_deref())?;
    target.meta.ensure_main_root(&root)?;
    let branch = target.meta.branch.clone();
    debug!(branch = %branch, "merging loop");

    let worktree = authorized_worktree(&target.meta, &root, &target.paths)?;
    if !worktree.is_dir() {
        bail!(
            "worktree {} is missing; nothing to merge (drop the loop instead)",
            worktree.display()
        );
    }
    if Git::new(&worktree).is_dirty()? {
        bail!(
            "worktree {} has uncommitted changes (run `agl commit` first)",
            worktree.display()
        );
    }
    git.ensure_clean("primary tree")?;

    let into = git.current_branch()?;
    if !git.merge_squash(&branch)? {
        bail!(
            "squash merge of '{branch}' hit conflicts; the merge is staged but not committed. \
             Resolve the conflicts, `git add` them, run `git commit`, then `agl drop {}` to \
             clean up",
            target.meta.slug
        );
    }

    // A squash of a branch with nothing new stages nothing; committing would
    // only produce a confusing empty-commit failure downstream.
    if !git.has_staged_changes()? {
        bail!(
            "no commits to merge from '{branch}' (the loop branch adds nothing \
             on top of '{into}')"
        );
    }

    let draft = match &agent {
        Some(agent) => Some(draft_message(&git, &root, &target, agent)?),
        None => None,
    };

    if !git.commit_with_editor(draft.as_deref())? {
        bail!(
            "merge commit aborted; the squash of '{branch}' is still staged \
             (commit it manually or `git reset` to discard)"
        );
    }
    info!(branch = %branch, into = %into, "squash merge committed");

    let deleted = if opts.no_delete {
        false
    } else {
        teardown(&git, &root, &target, &worktree)?;
        true
    };

    Ok(MergeOutcome {
        branch,
        into,
        deleted,
    })
}

/// Have the agent draft a commit message from the staged diff.
fn draft_message(
    git: &Git,
    root: &Path,
    target: &crate::resolve::LoopRef,
    agent: &AgentCmd,
) -> Result<String> {
    let diff = git.diff_cached()?;
    let report = target
        .paths
        .output_dir()
        .join(format!("MERGE-{}.md", target.meta.slug));
    let prompt = write_merge_prompt(
        &target.paths.prompts_dir(),
        &target.meta.slug,
        &diff,
        &report,
    )?;

    agent.run_wait(root, &prompt)?;

    let message = fs::read_to_string(&report)
        .with_context(|| format!("agent did not write the merge message {}", report.display()))?;
    let message = message.trim();
    if message.is_empty() {
        bail!("agent wrote an empty merge message to {}", report.display());
    }
    Ok(message.to_string())
}

/// Delete worktree, branch, and (external mode) the loop's leaf directory.
fn teardown(
    git: &Git,
    root: &Path,
    target: &crate::resolve::LoopRef,
    worktree: &Path,
) -> Result<()> {
    if !git.worktree_remove(worktree)? {
        warn!(worktree = %worktree.display(), "worktree was already gone");
    }
    git.worktree_prune()?;
    git.branch_delete(&target.meta.branch)?;
    if let Some(leaf) = authorized_external_leaf(&target.meta, root, &target.paths)?
        && leaf.exists()
    {
        fs::remove_dir_all(&leaf)
            .with_context(|| format!("remove leaf directory {}", leaf.display()))?;
    }
    info!(branch = %target.meta.branch, "loop branch and worktree removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::commit_loop;
    use crate::core::stage::Stage;
    use crate::init::{InitOptions, init_loop};
    use crate::stage::{StageOptions, run_stage};
    use crate::test_support::{TestRepo, git};

    fn init_with_commit(repo: &TestRepo) -> crate::init::InitOutcome {
        let opts = InitOptions {
            slug: "add-auth".to_string(),
            plan: repo.write_plan().expect("plan"),
            task: None,
            context: Vec::new(),
        };
        let outcome = init_loop(repo.root(), &opts).expect("init");
        run_stage(
            repo.root(),
            &StageOptions {
                stage: Stage::Work,
                dir: None,
                plans: Vec::new(),
                agent: Vec::new(),
            },
        )
        .expect("work");
        std::fs::write(outcome.worktree.join("auth.rs"), "mod auth;\n").expect("edit");
        commit_loop(repo.root(), None).expect("commit");
        outcome
    }

    #[test]
    fn merge_lands_changes_and_tears_the_loop_down() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_with_commit(&repo);

        let merged = merge_loop(repo.root(), &MergeOptions::default()).expect("merge");
        assert_eq!(merged.branch, "agl/add-auth");
        assert_eq!(merged.into, "main");
        assert!(merged.deleted);

        assert!(repo.root().join("auth.rs").is_file());
        assert!(!outcome.worktree.exists());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.is_empty());
        // The loop directory stays behind as an audit trail.
        assert!(outcome.loop_dir.join(".agl").is_file());
    }

    #[test]
    fn no_delete_keeps_branch_and_worktree() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_with_commit(&repo);

        let merged = merge_loop(
            repo.root(),
            &MergeOptions {
                no_delete: true,
                ..MergeOptions::default()
            },
        )
        .expect("merge");
        assert!(!merged.deleted);
        assert!(outcome.worktree.is_dir());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.contains("agl/add-auth"));
    }

    #[test]
    fn dirty_worktree_blocks_the_merge() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_with_commit(&repo);
        std::fs::write(outcome.worktree.join("wip.rs"), "wip\n").expect("edit");
        let err = merge_loop(repo.root(), &MergeOptions::default()).unwrap_err();
        assert!(err.to_string().contains("run `agl commit` first"));
    }

    #[test]
    fn blank_agent_program_fails_before_the_squash() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_with_commit(&repo);

        let err = merge_loop(
            repo.root(),
            &MergeOptions {
                agent: vec![String::new()],
                ..MergeOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("program name"));

        // The refused merge staged nothing and tore nothing down.
        let staged = git(repo.root(), &["diff", "--cached", "--name-only"]).expect("git");
        assert!(staged.is_empty());
        assert!(outcome.worktree.is_dir());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.contains("agl/add-auth"));
    }

    #[test]
    fn merge_without_loop_commits_reports_no_commits() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_loop(
            repo.root(),
            &InitOptions {
                slug: "add-auth".to_string(),
                plan: repo.write_plan().expect("plan"),
                task: None,
                context: Vec::new(),
            },
        )
        .expect("init");

        let err = merge_loop(repo.root(), &MergeOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no commits to merge"));
        assert!(outcome.worktree.is_dir());
        let branches = repo.git(&["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(branches.contains("agl/add-auth"));
    }

    #[test]
    #[cfg(unix)]
    fn agent_draft_seeds_the_commit_message() {
        let repo = TestRepo::new().expect("repo");
        let outcome = init_with_commit(&repo);

        let report = outcome.loop_dir.join("output/MERGE-add-auth.md");
        let script = repo
            .script(
                "drafter.sh",
                &format!("printf 'add-auth: wire up auth module\\n' > '{}'", report.display()),
            )
            .expect("script");

        let merged = merge_loop(
            repo.root(),
            &MergeOptions {
                agent: vec![script.display().to_string()],
                ..MergeOptions::default()
            },
        )
        .expect("merge");
        assert!(merged.deleted);

        assert!(outcome.loop_dir.join("prompts/merge-message.md").is_file());
        let last = git(repo.root(), &["log", "-1", "--pretty=%s"]).expect("log");
        assert_eq!(last, "add-auth: wire up auth module");
    }
}
