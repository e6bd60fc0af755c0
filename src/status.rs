//! Read-only listing of loops for `agl status`.
//!
//! One row per loop directory, most recent first. A record that fails to load
//! becomes an unreadable row instead of aborting the listing; status never
//! validates paths or touches git state.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::resolve::{list_loops, load_loop, recorded_worktree_path};

/// One loop in the status listing.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoopRow {
    Loaded {
        dir: String,
        slug: String,
        branch: String,
        round: u32,
        last_stage: String,
        worktree: String,
        live: bool,
    },
    Unreadable {
        dir: String,
        error: String,
    },
}

impl LoopRow {
    fn dir(&self) -> &str {
        match self {
            LoopRow::Loaded { dir, .. } | LoopRow::Unreadable { dir, .. } => dir,
        }
    }
}

/// Gather a row for every loop directory under the work root.
pub fn collect_status(root: &Path) -> Result<Vec<LoopRow>> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;

    let mut rows = Vec::new();
    for paths in list_loops(&root)? {
        let dir = paths.dir_name.clone();
        match load_loop(paths) {
            Ok(target) => {
                let live = recorded_worktree_path(&target.meta, &root).is_dir();
                rows.push(LoopRow::Loaded {
                    dir,
                    slug: target.meta.slug,
                    branch: target.meta.branch,
                    round: target.meta.round,
                    last_stage: target.meta.last_stage,
                    worktree: target.meta.worktree,
                    live,
                });
            }
            Err(err) => rows.push(LoopRow::Unreadable {
                dir,
                error: format!("{err:#}"),
            }),
        }
    }
    Ok(rows)
}

/// Plain-text table for stdout.
pub fn render_table(rows: &[LoopRow]) -> String {
    if rows.is_empty() {
        return "no loops\n".to_string();
    }

    let dir_w = rows
        .iter()
        .map(|r| r.dir().len())
        .chain(std::iter::once("LOOP".len()))
        .max()
        .unwrap_or(4);

    let mut out = format!(
        "{:dir_w$}  {:>5}  {:7}  {:4}  BRANCH\n",
        "LOOP", "ROUND", "STAGE", "LIVE"
    );
    for row in rows {
        match row {
            LoopRow::Loaded {
                dir,
                branch,
                round,
                last_stage,
                live,
                ..
            } => {
                let live = if *live { "yes" } else { "no" };
                out.push_str(&format!(
                    "{dir:dir_w$}  {round:>5}  {last_stage:7}  {live:4}  {branch}\n"
                ));
            }
            LoopRow::Unreadable { dir, error } => {
                out.push_str(&format!("{dir:dir_w$}  (unreadable: {error})\n"));
            }
        }
    }
    out
}
