//! Test-only helpers for building throwaway git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

/// A seeded git repository in a tempdir, named so external worktree paths
/// (`<base>/<repoName>/…`) have a stable repo segment.
pub struct TestRepo {
    temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Self::with_name("webapp")
    }

    pub fn with_name(name: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join(name);
        std::fs::create_dir_all(&root).context("create repo dir")?;
        git(&root, &["init", "-b", "main"])?;
        git(&root, &["config", "user.name", "Test"])?;
        git(&root, &["config", "user.email", "test@example.com"])?;
        // Merge commits open an editor; `true` accepts the prepared message.
        git(&root, &["config", "core.editor", "true"])?;
        std::fs::write(root.join(".gitignore"), "work/agent-loop/\n")
            .context("write .gitignore")?;
        std::fs::write(root.join("README.md"), format!("# {name}\n")).context("write README")?;
        git(&root, &["add", "-A"])?;
        git(&root, &["commit", "-m", "seed"])?;
        Ok(Self { temp, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory outside the repository, for worktree bases and agent scripts.
    pub fn outside_dir(&self) -> &Path {
        self.temp.path()
    }

    /// Write a file under the repository root, creating parent directories.
    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// A minimal plan document, committed at the repo root so merge
    /// preflights see a clean primary tree.
    pub fn write_plan(&self) -> Result<PathBuf> {
        let path = self.write_file("plan.md", "# plan\n\nAdd the feature.\n")?;
        // Repeat calls rewrite the same content; only commit a real change.
        if !git(&self.root, &["status", "--porcelain", "--", "plan.md"])?.is_empty() {
            git(&self.root, &["add", "plan.md"])?;
            git(&self.root, &["commit", "-m", "add plan"])?;
        }
        Ok(path)
    }

    /// Point external worktree placement at a directory outside the repo.
    pub fn configure_external_base(&self, base: &Path) -> Result<()> {
        let contents = format!("worktree_base = \"{}\"\n", base.display());
        std::fs::write(self.root.join(".agl.toml"), contents).context("write .agl.toml")?;
        // Keep the primary tree clean for merge preflights.
        git(&self.root, &["add", ".agl.toml"])?;
        git(&self.root, &["commit", "-m", "configure worktree base"])?;
        Ok(())
    }

    /// An executable shell script outside the repository, usable as an agent.
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;
        let path = self.temp.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))
            .with_context(|| format!("write {}", path.display()))?;
        let mut perms = std::fs::metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(path)
    }

    /// Run git in the repository root and capture trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(&self.root, args)
    }
}

/// Run git in `root`, capturing trimmed stdout; non-zero exit is an error.
pub fn git(root: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {args:?}"))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
