//! Operator configuration stored at `<repoRoot>/.agl.toml`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

/// Environment override for the worktree base, taking precedence over the file.
pub const BASE_ENV_VAR: &str = "AGL_WORKTREE_BASE";

/// Name of the config file at the repository root.
pub const CONFIG_FILE: &str = ".agl.toml";

/// Per-repository configuration (TOML).
///
/// This file is edited by humans and entirely optional; without it every loop
/// falls back to internal worktree placement.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AglConfig {
    /// Directory under which external worktrees are created
    /// (`<base>/<repoName>/<stamp>-<slug>/tree`). Absolute, or unset.
    pub worktree_base: Option<PathBuf>,
}

impl AglConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(base) = &self.worktree_base
            && !base.is_absolute()
        {
            return Err(anyhow!(
                "worktree_base must be absolute (got '{}')",
                base.display()
            ));
        }
        Ok(())
    }
}

/// Load the config for a repository, applying the environment override.
///
/// A missing file yields the default config.
pub fn load_config(repo_root: &Path) -> Result<AglConfig> {
    let mut cfg = load_config_file(&repo_root.join(CONFIG_FILE))?;
    cfg.worktree_base = effective_base(cfg.worktree_base, std::env::var_os(BASE_ENV_VAR));
    cfg.validate()?;
    Ok(cfg)
}

fn load_config_file(path: &Path) -> Result<AglConfig> {
    if !path.exists() {
        return Ok(AglConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AglConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Pick the base from env override or file value, trimming trailing slashes
/// so derived paths stay byte-comparable.
fn effective_base(file_value: Option<PathBuf>, env_value: Option<OsString>) -> Option<PathBuf> {
    let chosen = match env_value {
        Some(v) if !v.is_empty() => Some(PathBuf::from(v)),
        _ => file_value,
    };
    chosen.map(|base| {
        let s = base.display().to_string();
        let trimmed = s.trim_end_matches('/');
        if trimmed.is_empty() {
            base
        } else {
            PathBuf::from(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config_file(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AglConfig::default());
        assert!(cfg.worktree_base.is_none());
    }

    #[test]
    fn parses_worktree_base() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".agl.toml");
        fs::write(&path, "worktree_base = \"/srv/trees\"\n").expect("write");
        let cfg = load_config_file(&path).expect("load");
        assert_eq!(cfg.worktree_base, Some(PathBuf::from("/srv/trees")));
    }

    #[test]
    fn rejects_relative_base() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".agl.toml");
        fs::write(&path, "worktree_base = \"trees\"\n").expect("write");
        let err = load_config_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("must be absolute"));
    }

    #[test]
    fn env_override_beats_file_value() {
        let base = effective_base(
            Some(PathBuf::from("/from/file")),
            Some(OsString::from("/from/env")),
        );
        assert_eq!(base, Some(PathBuf::from("/from/env")));
    }

    #[test]
    fn empty_env_falls_back_to_file() {
        let base = effective_base(Some(PathBuf::from("/from/file")), Some(OsString::new()));
        assert_eq!(base, Some(PathBuf::from("/from/file")));
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let base = effective_base(Some(PathBuf::from("/srv/trees//")), None);
        assert_eq!(base, Some(PathBuf::from("/srv/trees")));
    }
}
