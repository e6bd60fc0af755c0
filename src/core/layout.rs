//! Canonical filesystem layout of a loop.
//!
//! Every path a loop touches is derived here from three inputs: the primary
//! repository root, the loop directory name (`<stamp>-<slug>`), and in
//! external mode the configured worktree base. Validation elsewhere compares
//! recorded paths against these derivations byte for byte, so the derivations
//! must stay the single source of truth.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Repo-relative directory that holds every loop directory.
pub const WORK_ROOT: &str = "work/agent-loop";

/// Metadata file name inside a loop directory.
pub const META_FILE: &str = ".agl";

/// Fixed final path segment of every worktree.
pub const WORKTREE_LEAF: &str = "tree";

/// Creation stamp used as the loop directory name prefix, filesystem-sortable.
pub fn format_stamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

/// `<stamp>-<slug>`, the loop directory name.
pub fn loop_dir_name(stamp: &str, slug: &str) -> String {
    format!("{stamp}-{slug}")
}

/// Split a loop directory name back into `(stamp, slug)`.
pub fn parse_loop_dir_name(name: &str) -> Option<(&str, &str)> {
    use std::sync::LazyLock;
    static NAME_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^(\d{8}-\d{6})-([a-z0-9]+(?:-[a-z0-9]+)*)$").unwrap()
    });

    let caps = NAME_RE.captures(name)?;
    let stamp = caps.get(1)?.as_str();
    let slug = caps.get(2)?.as_str();
    Some((stamp, slug))
}

/// Repo-relative worktree path recorded in internal fallback mode.
pub fn internal_worktree_rel(dir_name: &str) -> String {
    format!("{WORK_ROOT}/{dir_name}/{WORKTREE_LEAF}")
}

/// Leaf directory owned by a loop in external mode; removed at teardown.
pub fn external_leaf_dir(base: &Path, repo_name: &str, dir_name: &str) -> PathBuf {
    base.join(repo_name).join(dir_name)
}

/// Absolute worktree path expected in external mode.
pub fn external_worktree(base: &Path, repo_name: &str, dir_name: &str) -> PathBuf {
    external_leaf_dir(base, repo_name, dir_name).join(WORKTREE_LEAF)
}

/// Resolved locations of one loop directory's contents.
#[derive(Debug, Clone)]
pub struct LoopPaths {
    pub loop_dir: PathBuf,
    pub dir_name: String,
}

impl LoopPaths {
    pub fn new(repo_root: &Path, dir_name: &str) -> Self {
        Self {
            loop_dir: repo_root.join(WORK_ROOT).join(dir_name),
            dir_name: dir_name.to_string(),
        }
    }

    /// Wrap an existing loop directory path whose final segment is the name.
    pub fn from_dir(loop_dir: PathBuf) -> Option<Self> {
        let dir_name = loop_dir.file_name()?.to_str()?.to_string();
        parse_loop_dir_name(&dir_name)?;
        Some(Self { loop_dir, dir_name })
    }

    pub fn meta_path(&self) -> PathBuf {
        self.loop_dir.join(META_FILE)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.loop_dir.join("prompts")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.loop_dir.join("output")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.loop_dir.join("context")
    }

    /// Worktree location in internal fallback mode, inside the loop directory.
    pub fn internal_tree_dir(&self) -> PathBuf {
        self.loop_dir.join(WORKTREE_LEAF)
    }
}
