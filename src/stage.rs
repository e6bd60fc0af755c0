//! Orchestration shared by the four stage commands (work, enhance, review,
//! fix).
//!
//! A stage snapshots extra inputs, scaffolds the round's prompt, records the
//! stage in metadata, and hands the prompt to the agent inside the worktree.
//! Only `fix` moves the round counter, and only after its prompt exists, so
//! the prompt set is always ahead of (or equal to) the counter.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::core::stage::Stage;
use crate::io::agent::AgentCmd;
use crate::io::git::Git;
use crate::io::meta::write_meta;
use crate::io::prompt::{PromptContext, latest_prompt, scaffold_prompt};
use crate::io::safety::authorized_worktree;
use crate::io::snapshot::{list_context_files, snapshot_file};
use crate::resolve::{LoopRef, resolve_target};

/// Inputs to a stage command.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub stage: Stage,
    pub dir: Option<PathBuf>,
    /// Extra plan/context files to snapshot before scaffolding.
    pub plans: Vec<PathBuf>,
    /// Trailing agent argv; empty means print the manual invocation.
    pub agent: Vec<String>,
}

/// What the operator must run by hand when no agent command was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualHandoff {
    pub prompt: PathBuf,
    pub report: PathBuf,
    pub invocation: String,
}

/// Run one stage. Returns `None` after an agent handoff (which on Unix does
/// not return at all), `Some` with the manual invocation otherwise.
///
/// Argument and precondition checks all run before the first side effect, so
/// a refused invocation leaves the loop untouched.
pub fn run_stage(root: &Path, opts: &StageOptions) -> Result<Option<ManualHandoff>> {
    let agent = AgentCmd::parse(&opts.agent)?;
    let root = fs::canonicalize(root)
        .with_context(|| format!("resolve repository root {}", root.display()))?;
    debug!(stage = opts.stage.name(), root = %root.display(), "running stage");
    let git = Git::new(&root);

    if !git.is_primary_worktree()? {
        bail!("stage commands run from the primary worktree only");
    }

    let mut target = resolve_target(&root, opts.dir.as_deref(), None)?;
    target.meta.ensure_main_root(&root)?;

    let worktree = authorized_worktree(&target.meta, &root, &target.paths)?;
    if !worktree.is_dir() {
        bail!(
            "worktree {} is missing (the loop was merged or dropped; start a new one)",
            worktree.display()
        );
    }

    let round = target.meta.round;
    let prior = prior_report(&target, opts.stage, round)?;

    for input in &opts.plans {
        snapshot_file(&target.paths.context_dir(), input)?;
    }

    let ctx = prompt_context(&root, &target, &worktree, opts.stage, round, prior)?;
    let (scaffolded, created) =
        scaffold_prompt(&target.paths.prompts_dir(), opts.stage, round, &ctx)?;
    debug!(prompt = %scaffolded.display(), created, "stage prompt ready");

    target.meta.last_stage = opts.stage.name().to_string();
    if opts.stage == Stage::Fix {
        target.meta.round += 1;
        info!(round = target.meta.round, "round advanced by fix");
    }
    target.meta.apply_to(&mut target.file)?;
    write_meta(&target.paths.meta_path(), &target.file)?;

    // `work` resumes whatever worker prompt is most recent; the other stages
    // always hand off the prompt for the current round.
    let prompt = if opts.stage == Stage::Work {
        latest_prompt(&target.paths.prompts_dir(), Stage::Work.prompt_stem())?
            .context("no worker prompt found after scaffolding")?
    } else {
        scaffolded
    };
    let report = PathBuf::from(&ctx.report);

    match agent {
        Some(agent) => {
            agent.hand_off(&worktree, &prompt)?;
            Ok(None)
        }
        None => {
            let invocation = placeholder_invocation(&worktree, &prompt);
            info!(prompt = %prompt.display(), "no agent given, printing manual invocation");
            Ok(Some(ManualHandoff {
                prompt,
                report,
                invocation,
            }))
        }
    }
}

/// Prior-round cross reference, and the precondition it implies: a re-review
/// needs the fix report of the round before, a fix links the review report
/// for its own round when the reviewer has produced one.
fn prior_report(target: &LoopRef, stage: Stage, round: u32) -> Result<Option<String>> {
    match stage {
        Stage::Review if round > 1 => {
            let fix_report = target
                .paths
                .output_dir()
                .join(Stage::Fix.report_file_name(&target.meta.slug, round - 1));
            if !fix_report.is_file() {
                bail!(
                    "re-review at round {round} needs the fix report {} (run the fixer for \
                     round {} first)",
                    fix_report.display(),
                    round - 1
                );
            }
            Ok(Some(fix_report.display().to_string()))
        }
        Stage::Fix => {
            let review_report = target
                .paths
                .output_dir()
                .join(Stage::Review.report_file_name(&target.meta.slug, round));
            Ok(review_report
                .is_file()
                .then(|| review_report.display().to_string()))
        }
        _ => Ok(None),
    }
}

/// Gather the template values for a stage at `round`.
fn prompt_context(
    root: &Path,
    target: &LoopRef,
    worktree: &Path,
    stage: Stage,
    round: u32,
    prior_report: Option<String>,
) -> Result<PromptContext> {
    let meta = &target.meta;
    let plan_abs = root.join(&meta.plan_path);
    let plan_name = plan_abs
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("plan.md")
        .to_string();
    let context_files = list_context_files(&target.paths.context_dir(), &plan_name)?
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let report = target
        .paths
        .output_dir()
        .join(stage.report_file_name(&meta.slug, round));

    Ok(PromptContext {
        slug: meta.slug.clone(),
        round,
        worktree: worktree.display().to_string(),
        plan: plan_abs.display().to_string(),
        context_files,
        report: report.display().to_string(),
        prior_report,
    })
}

fn placeholder_invocation(worktree: &Path, prompt: &Path) -> String {
    format!(
        "cd {} && <agent-command> {}",
        worktree.display(),
        prompt.display()
    )
}
