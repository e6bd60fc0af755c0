//! Loop metadata storage (`.agl`): one `KEY=value` pair per line.
//!
//! The raw [`MetaFile`] preserves unknown keys and line order across rewrites;
//! the typed [`LoopMeta`] view enforces the structural invariants every
//! command relies on. Corruption is surfaced at the point of use rather than
//! pre-validated globally.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::core::slug::{branch_for, validate_slug};

const FEATURE_SLUG: &str = "FEATURE_SLUG";
const BRANCH: &str = "BRANCH";
const WORKTREE: &str = "WORKTREE";
const WORKTREE_MODE: &str = "WORKTREE_MODE";
const WORKTREE_BASE: &str = "WORKTREE_BASE";
const MAIN_ROOT: &str = "MAIN_ROOT";
const ROUND: &str = "ROUND";
const LAST_STAGE: &str = "LAST_STAGE";
const COMMITS: &str = "COMMITS";
const PLAN_PATH: &str = "PLAN_PATH";

/// Declared placement value for worktrees outside the repository.
pub const MODE_EXTERNAL: &str = "external";

/// Raw metadata lines, mutated in memory and rewritten as a whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFile {
    lines: Vec<String>,
}

impl MetaFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`; missing or duplicated keys are fatal.
    pub fn get(&self, key: &str) -> Result<&str> {
        match self.get_optional(key)? {
            Some(value) => Ok(value),
            None => Err(anyhow!("missing {key} in metadata")),
        }
    }

    /// Value for `key` if present; a duplicated key is still fatal.
    pub fn get_optional(&self, key: &str) -> Result<Option<&str>> {
        let mut found = None;
        for line in &self.lines {
            if let Some((k, v)) = line.split_once('=')
                && k == key
            {
                if found.is_some() {
                    bail!("duplicate {key} in metadata");
                }
                found = Some(v);
            }
        }
        Ok(found)
    }

    /// Replace the line for `key` in place, or append one.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || key.contains('=') || key.contains('\n') {
            bail!("invalid metadata key '{key}'");
        }
        if value.contains('\n') {
            bail!("metadata value for {key} must not contain newlines");
        }
        let entry = format!("{key}={value}");
        let mut replaced = false;
        self.lines.retain_mut(|line| {
            let matches = line
                .split_once('=')
                .is_some_and(|(k, _)| k == key);
            if !matches {
                return true;
            }
            if replaced {
                return false;
            }
            *line = entry.clone();
            replaced = true;
            true
        });
        if !replaced {
            self.lines.push(entry);
        }
        Ok(())
    }

    fn render(&self) -> String {
        let mut buf = self.lines.join("\n");
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf
    }
}

/// Load a metadata file from disk.
pub fn load_meta(path: &Path) -> Result<MetaFile> {
    debug!(path = %path.display(), "loading loop metadata");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read metadata {}", path.display()))?;
    let lines = contents.lines().map(str::to_string).collect();
    Ok(MetaFile { lines })
}

/// Atomically write a metadata file to disk (temp file + rename).
pub fn write_meta(path: &Path, meta: &MetaFile) -> Result<()> {
    debug!(path = %path.display(), "writing loop metadata");
    let parent = path
        .parent()
        .with_context(|| format!("metadata path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("metadata path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, meta.render())
        .with_context(|| format!("write temp metadata {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace metadata {}", path.display()))?;
    Ok(())
}

/// Typed, invariant-checked view of one loop's metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopMeta {
    pub slug: String,
    /// Always `agl/<slug>`.
    pub branch: String,
    /// Recorded worktree path, untrusted until path-safety validation.
    pub worktree: String,
    /// `Some` only in external mode, paired with `worktree_base`.
    pub worktree_mode: Option<String>,
    pub worktree_base: Option<PathBuf>,
    /// Absolute primary repository root captured at creation.
    pub main_root: PathBuf,
    /// Review/fix cycle counter, starts at 1.
    pub round: u32,
    pub last_stage: String,
    /// Short hashes recorded by the commit transition, oldest first.
    pub commits: Vec<String>,
    /// Plan snapshot path, relative to `main_root`.
    pub plan_path: String,
}

impl LoopMeta {
    /// Parse the typed view out of raw lines and check structural invariants.
    pub fn from_file(file: &MetaFile) -> Result<Self> {
        let slug = file.get(FEATURE_SLUG)?.to_string();
        validate_slug(&slug)?;

        let branch = file.get(BRANCH)?.to_string();
        let expected_branch = branch_for(&slug);
        if branch != expected_branch {
            bail!("metadata branch '{branch}' does not match expected '{expected_branch}'");
        }

        let worktree = file.get(WORKTREE)?.to_string();
        if worktree.is_empty() {
            bail!("metadata {WORKTREE} must not be empty");
        }

        let worktree_mode = file.get_optional(WORKTREE_MODE)?.map(str::to_string);
        let worktree_base = file.get_optional(WORKTREE_BASE)?.map(PathBuf::from);
        match (&worktree_mode, &worktree_base) {
            (Some(mode), Some(_)) if mode == MODE_EXTERNAL => {}
            (Some(mode), Some(_)) => bail!("unknown {WORKTREE_MODE} '{mode}'"),
            (None, None) => {}
            _ => bail!("{WORKTREE_MODE} and {WORKTREE_BASE} must be present together"),
        }

        let main_root = PathBuf::from(file.get(MAIN_ROOT)?);
        if !main_root.is_absolute() {
            bail!("metadata {MAIN_ROOT} must be absolute (got '{}')", main_root.display());
        }

        let round: u32 = file
            .get(ROUND)?
            .parse()
            .with_context(|| format!("malformed {ROUND} in metadata"))?;
        if round == 0 {
            bail!("metadata {ROUND} must be >= 1");
        }

        let last_stage = file.get(LAST_STAGE)?.to_string();

        let commits = file
            .get_optional(COMMITS)?
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let plan_path = file.get(PLAN_PATH)?.to_string();

        Ok(Self {
            slug,
            branch,
            worktree,
            worktree_mode,
            worktree_base,
            main_root,
            round,
            last_stage,
            commits,
            plan_path,
        })
    }

    /// Write every typed field back into the raw file.
    pub fn apply_to(&self, file: &mut MetaFile) -> Result<()> {
        file.set(FEATURE_SLUG, &self.slug)?;
        file.set(BRANCH, &self.branch)?;
        file.set(WORKTREE, &self.worktree)?;
        if let Some(mode) = &self.worktree_mode {
            file.set(WORKTREE_MODE, mode)?;
        }
        if let Some(base) = &self.worktree_base {
            file.set(WORKTREE_BASE, &base.display().to_string())?;
        }
        file.set(MAIN_ROOT, &self.main_root.display().to_string())?;
        file.set(ROUND, &self.round.to_string())?;
        file.set(LAST_STAGE, &self.last_stage)?;
        file.set(COMMITS, &self.commits.join(","))?;
        file.set(PLAN_PATH, &self.plan_path)?;
        Ok(())
    }

    /// Reject the record unless it was created for the current repository.
    pub fn ensure_main_root(&self, current_root: &Path) -> Result<()> {
        let recorded = fs::canonicalize(&self.main_root)
            .with_context(|| format!("resolve recorded root {}", self.main_root.display()))?;
        let current = fs::canonicalize(current_root)
            .with_context(|| format!("resolve repository root {}", current_root.display()))?;
        if recorded != current {
            bail!(
                "loop belongs to {} but the current repository is {}",
                recorded.display(),
                current.display()
            );
        }
        Ok(())
    }

    pub fn is_external(&self) -> bool {
        self.worktree_mode.as_deref() == Some(MODE_EXTERNAL)
    }
}
