//! Prompt scaffolding for stage handoffs.
//!
//! The prompt set is append-only: scaffolding is skip-if-present so a re-run
//! of a stage at the same round resumes with the existing prompt instead of
//! clobbering whatever the operator may have edited into it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::round::{PromptCandidate, compare_candidates, parse_round};
use crate::core::stage::Stage;

const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");
const ENHANCER_TEMPLATE: &str = include_str!("prompts/enhancer.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const FIXER_TEMPLATE: &str = include_str!("prompts/fixer.md");
const MERGER_TEMPLATE: &str = include_str!("prompts/merger.md");

/// Keep merge-draft prompts readable even for huge staged diffs.
const DIFF_LIMIT_BYTES: usize = 100_000;

/// Values available to every stage template. Paths are absolute because the
/// agent's working directory is the worktree, not the primary root.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub slug: String,
    pub round: u32,
    pub worktree: String,
    pub plan: String,
    pub context_files: Vec<String>,
    pub report: String,
    /// Prior-round cross-reference: the fix report for a re-review, the
    /// review report for a fix.
    pub prior_report: Option<String>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("worker", WORKER_TEMPLATE)
            .expect("worker template should be valid");
        env.add_template("enhancer", ENHANCER_TEMPLATE)
            .expect("enhancer template should be valid");
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .expect("reviewer template should be valid");
        env.add_template("fixer", FIXER_TEMPLATE)
            .expect("fixer template should be valid");
        env.add_template("merger", MERGER_TEMPLATE)
            .expect("merger template should be valid");
        Self { env }
    }

    fn render(&self, stage: Stage, ctx: &PromptContext) -> Result<String> {
        let template = self.env.get_template(stage.prompt_stem())?;
        let rendered = template.render(context! {
            slug => ctx.slug,
            round => ctx.round,
            worktree => ctx.worktree,
            plan => ctx.plan,
            context_files => ctx.context_files,
            report => ctx.report,
            prior_report => ctx.prior_report,
        })?;
        Ok(rendered)
    }
}

/// Scaffold the prompt for `stage` at `round`, skipping if it already exists.
///
/// Returns the prompt path and whether a new file was written.
pub fn scaffold_prompt(
    prompts_dir: &Path,
    stage: Stage,
    round: u32,
    ctx: &PromptContext,
) -> Result<(PathBuf, bool)> {
    let path = prompts_dir.join(stage.prompt_file_name(round));
    if path.exists() {
        debug!(path = %path.display(), "prompt already scaffolded");
        return Ok((path, false));
    }
    let rendered = PromptEngine::new().render(stage, ctx)?;
    fs::create_dir_all(prompts_dir)
        .with_context(|| format!("create directory {}", prompts_dir.display()))?;
    fs::write(&path, rendered).with_context(|| format!("write prompt {}", path.display()))?;
    debug!(path = %path.display(), "prompt scaffolded");
    Ok((path, true))
}

/// Write the merge-draft prompt, overwriting any earlier attempt.
///
/// Merging is terminal, so unlike stage prompts this one is not append-only:
/// a retry after a failed merge should see the current staged diff.
pub fn write_merge_prompt(
    prompts_dir: &Path,
    slug: &str,
    diff: &str,
    report: &Path,
) -> Result<PathBuf> {
    let truncated = diff.len() > DIFF_LIMIT_BYTES;
    let shown = if truncated {
        let mut end = DIFF_LIMIT_BYTES;
        while !diff.is_char_boundary(end) {
            end -= 1;
        }
        &diff[..end]
    } else {
        diff
    };
    let engine = PromptEngine::new();
    let template = engine.env.get_template("merger")?;
    let rendered = template.render(context! {
        slug => slug,
        diff => shown,
        truncated => truncated,
        report => report.display().to_string(),
    })?;
    fs::create_dir_all(prompts_dir)
        .with_context(|| format!("create directory {}", prompts_dir.display()))?;
    let path = prompts_dir.join("merge-message.md");
    fs::write(&path, rendered).with_context(|| format!("write prompt {}", path.display()))?;
    Ok(path)
}

/// Most recent prompt for a stem: newest mtime, round number breaking ties.
pub fn latest_prompt(prompts_dir: &Path, stem: &str) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(prompts_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("read prompts directory {}", prompts_dir.display()));
        }
    };

    let mut best: Option<(PromptCandidate, PathBuf)> = None;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("read prompts directory {}", prompts_dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(round) = parse_round(stem, name) else {
            continue;
        };
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("stat prompt {}", entry.path().display()))?;
        let candidate = PromptCandidate { round, modified };
        let replace = match &best {
            Some((current, _)) => {
                compare_candidates(&candidate, current) == std::cmp::Ordering::Greater
            }
            None => true,
        };
        if replace {
            best = Some((candidate, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}
