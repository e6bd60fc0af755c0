//! Git adapter for lifecycle commands.
//!
//! Branch and worktree surgery is the riskiest thing this tool does, so we
//! keep a small, explicit wrapper around `git` subprocess calls instead of
//! scattering `Command` invocations through the commands.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Root of the working tree containing `workdir`.
    pub fn repo_root(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Absolute `.git` directory of this checkout.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--path-format=absolute", "--git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Absolute common `.git` directory shared by all worktrees of the repo.
    pub fn git_common_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--path-format=absolute", "--git-common-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// True when `workdir` is in the primary worktree, not a linked one.
    pub fn is_primary_worktree(&self) -> Result<bool> {
        let git_dir = resolve_existing(&self.git_dir()?)?;
        let common = resolve_existing(&self.git_common_dir()?)?;
        Ok(git_dir == common)
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the current HEAD short SHA at a fixed length.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if the working tree has any change, staged, unstaged or untracked.
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Ensure the working tree is fully clean (including untracked files).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self, what: &str) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!(what, "tree is clean");
            return Ok(());
        }
        warn!(what, changes = entries.len(), "tree not clean");
        let mut msg = format!("{what} is not clean (commit or stash first):\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create a branch at current HEAD without checking it out.
    #[instrument(skip_all, fields(branch))]
    pub fn branch_create(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating branch at HEAD");
        self.run_checked(&["branch", branch])?;
        Ok(())
    }

    /// Force-delete a local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn branch_delete(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Attach a new worktree for an existing branch.
    #[instrument(skip_all)]
    pub fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        debug!(path = %path.display(), branch, "adding worktree");
        let path_arg = path_arg(path);
        self.run_checked(&["worktree", "add", &path_arg, branch])?;
        Ok(())
    }

    /// Force-remove a worktree. Returns false if git no longer knows it.
    #[instrument(skip_all)]
    pub fn worktree_remove(&self, path: &Path) -> Result<bool> {
        debug!(path = %path.display(), "removing worktree");
        let path_arg = path_arg(path);
        let output = self.run(&["worktree", "remove", "--force", &path_arg])?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is not a working tree") || stderr.contains("No such file") {
            warn!(path = %path.display(), "worktree already gone");
            return Ok(false);
        }
        Err(anyhow!("git worktree remove failed: {}", stderr.trim()))
    }

    /// Drop stale worktree bookkeeping.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Full staged patch, for drafting a merge commit message.
    pub fn diff_cached(&self) -> Result<String> {
        self.run_capture(&["diff", "--cached"])
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Open the commit editor on the caller's terminal, optionally pre-seeded.
    ///
    /// Returns false when the commit was aborted (empty message, editor kill).
    #[instrument(skip_all)]
    pub fn commit_with_editor(&self, draft: Option<&str>) -> Result<bool> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir);
        match draft {
            Some(message) => {
                cmd.args(["commit", "-e", "-m", message]);
            }
            None => {
                cmd.arg("commit");
            }
        }
        let status = cmd
            .status()
            .context("spawn git commit")?;
        Ok(status.success())
    }

    /// Squash-merge a branch into the current one without committing.
    ///
    /// Returns Ok(false) on merge conflicts, which leave the partial result
    /// staged for manual resolution.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_squash(&self, branch: &str) -> Result<bool> {
        debug!(branch, "squash merging");
        let output = self.run(&["merge", "--squash", branch])?;
        if output.status.success() {
            return Ok(true);
        }
        // Unmerged index entries mean a conflicted squash awaiting
        // resolution; any other failure is fatal.
        let unmerged = self.run_capture(&["ls-files", "--unmerged"])?;
        if !unmerged.trim().is_empty() {
            warn!(branch, "squash merge hit conflicts");
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!(
            "git merge --squash {branch} failed: {}",
            if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
        ))
    }

    /// True when `rev` is an ancestor of HEAD. Unresolvable revs count as no.
    pub fn is_ancestor_of_head(&self, rev: &str) -> Result<bool> {
        let status = self
            .run(&["merge-base", "--is-ancestor", rev, "HEAD"])?
            .status;
        Ok(status.success())
    }

    /// True when the path is matched by the repository's ignore rules.
    pub fn is_ignored(&self, path: &str) -> Result<bool> {
        let output = self.run(&["check-ignore", "-q", "--", path])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow!("git check-ignore failed: {}", stderr.trim()))
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        // Tolerance checks above match git's English messages; pin the locale.
        Command::new("git")
            .args(args)
            .env("LC_ALL", "C")
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Canonicalize a path that is expected to exist.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("resolve {}", path.display()))
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? notes.md").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "notes.md".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/auth.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/auth.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.rs -> new.rs").expect("parse");
        assert_eq!(e.path, "new.rs");
    }

    #[test]
    fn ignore_query_with_trailing_slash_matches_directory_entries() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        // `.gitignore` holds `work/agent-loop/`; the directory does not exist
        // yet, so only the slash form of the query can match.
        assert!(git.is_ignored("work/agent-loop/").expect("ignored"));
        assert!(!git.is_ignored("docs/").expect("not ignored"));
    }

    #[test]
    fn squash_conflict_is_reported_not_fatal() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        repo.git(&["branch", "feature"]).expect("branch");
        repo.write_file("README.md", "# ours\n").expect("edit");
        repo.git(&["commit", "-am", "ours"]).expect("commit");
        repo.git(&["checkout", "feature"]).expect("checkout");
        repo.write_file("README.md", "# theirs\n").expect("edit");
        repo.git(&["commit", "-am", "theirs"]).expect("commit");
        repo.git(&["checkout", "main"]).expect("checkout");

        assert!(!git.merge_squash("feature").expect("conflict is not fatal"));
        assert!(!repo.git(&["ls-files", "--unmerged"]).expect("ls").is_empty());
    }
}
