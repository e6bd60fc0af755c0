//! Feature-loop lifecycle CLI.
//!
//! Each feature gets an isolated git branch and worktree plus a loop directory
//! under `work/agent-loop/` holding prompts, reports, and context snapshots.
//! Commands move the loop through work/enhance/review/fix rounds and finish
//! with a squash merge or a drop.

use std::path::{Path, PathBuf};

use agl::commit::commit_loop;
use agl::core::stage::Stage;
use agl::drop::{DropOptions, drop_loop};
use agl::init::{InitOptions, init_loop};
use agl::io::git::Git;
use agl::logging;
use agl::merge::{MergeOptions, merge_loop};
use agl::stage::{StageOptions, run_stage};
use agl::status::{collect_status, render_table};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agl",
    version,
    about = "Feature loops on isolated git worktrees: init, work, review, fix, merge"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StageArgs {
    /// Loop directory (defaults to the most recent loop with a live worktree).
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
    /// Extra plan files to snapshot into the loop's context.
    #[arg(long = "plan", value_name = "PATH")]
    plans: Vec<PathBuf>,
    /// Agent command to hand the prompt to; omit to run it yourself.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "AGENT")]
    agent: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a loop: branch at HEAD, worktree, loop directory with snapshots.
    Init {
        /// Feature slug (lowercase words joined by '-').
        slug: String,
        /// Plan document to snapshot into the loop.
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,
        /// Task description to snapshot alongside the plan.
        #[arg(long, value_name = "PATH")]
        task: Option<PathBuf>,
        /// Additional context files to snapshot.
        #[arg(long = "context", value_name = "PATH")]
        context: Vec<PathBuf>,
    },
    /// Scaffold (or resume) the worker prompt and hand off to the agent.
    Work(StageArgs),
    /// Commit everything in the loop worktree as one stage commit.
    Commit {
        /// Loop directory (defaults to the most recent loop with a live worktree).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Scaffold the enhancer prompt (hardening pass before review).
    Enhance(StageArgs),
    /// Scaffold the reviewer prompt for the current round.
    Review(StageArgs),
    /// Scaffold the fixer prompt and advance the loop to the next round.
    Fix(StageArgs),
    /// Squash-merge the loop branch into the current branch, then clean up.
    Merge {
        /// Slug of the loop to merge (defaults to the most recent live loop).
        slug: Option<String>,
        /// Loop directory, overrides the slug.
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Keep the worktree and branch after merging.
        #[arg(long)]
        no_delete: bool,
        /// Agent command for drafting the merge commit message.
        #[arg(
            long = "agent",
            num_args = 1..,
            allow_hyphen_values = true,
            value_name = "AGENT"
        )]
        agent: Vec<String>,
    },
    /// Abandon a loop: remove its worktree and branch.
    Drop {
        /// Slug of the loop to drop (defaults to the most recent live loop).
        slug: Option<String>,
        /// Loop directory, overrides the slug.
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Also delete the loop directory with prompts and reports.
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List loops and their state.
    Status {
        /// Emit a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;
    match cli.command {
        Command::Init {
            slug,
            plan,
            task,
            context,
        } => cmd_init(
            &root,
            InitOptions {
                slug,
                plan,
                task,
                context,
            },
        ),
        Command::Work(args) => cmd_stage(&root, Stage::Work, args),
        Command::Commit { dir } => cmd_commit(&root, dir.as_deref()),
        Command::Enhance(args) => cmd_stage(&root, Stage::Enhance, args),
        Command::Review(args) => cmd_stage(&root, Stage::Review, args),
        Command::Fix(args) => cmd_stage(&root, Stage::Fix, args),
        Command::Merge {
            slug,
            dir,
            no_delete,
            agent,
        } => cmd_merge(
            &root,
            MergeOptions {
                slug,
                dir,
                no_delete,
                agent,
            },
        ),
        Command::Drop {
            slug,
            dir,
            all,
            yes,
        } => cmd_drop(&root, DropOptions { slug, dir, all, yes }),
        Command::Status { json } => cmd_status(&root, json),
    }
}

/// Every command addresses the repository containing the current directory.
fn repo_root() -> Result<PathBuf> {
    Git::new(Path::new("."))
        .repo_root()
        .context("not inside a git repository")
}

fn cmd_init(root: &Path, opts: InitOptions) -> Result<()> {
    let outcome = init_loop(root, &opts)?;
    println!("initialized loop '{}'", outcome.slug);
    println!("  branch    {}", outcome.branch);
    println!("  worktree  {}", outcome.worktree.display());
    println!("  loop dir  {}", outcome.loop_dir.display());
    Ok(())
}

fn cmd_stage(root: &Path, stage: Stage, args: StageArgs) -> Result<()> {
    let opts = StageOptions {
        stage,
        dir: args.dir,
        plans: args.plans,
        agent: args.agent,
    };
    // `Some` means no agent was given; an agent handoff does not return here.
    if let Some(handoff) = run_stage(root, &opts)? {
        println!("prompt ready: {}", handoff.prompt.display());
        println!("expected report: {}", handoff.report.display());
        println!("run the agent yourself:");
        println!("  {}", handoff.invocation);
    }
    Ok(())
}

fn cmd_commit(root: &Path, dir: Option<&Path>) -> Result<()> {
    let outcome = commit_loop(root, dir)?;
    println!("committed {} \"{}\"", outcome.hash, outcome.message);
    if outcome.replaced {
        println!("(amended commit replaced in the loop record)");
    }
    Ok(())
}

fn cmd_merge(root: &Path, opts: MergeOptions) -> Result<()> {
    let outcome = merge_loop(root, &opts)?;
    println!("merged '{}' into '{}'", outcome.branch, outcome.into);
    if outcome.deleted {
        println!("removed the loop worktree and branch");
    } else {
        println!("kept the loop worktree and branch (--no-delete)");
    }
    Ok(())
}

fn cmd_drop(root: &Path, opts: DropOptions) -> Result<()> {
    match drop_loop(root, &opts)? {
        Some(outcome) => println!("dropped '{}'", outcome.branch),
        None => println!("drop cancelled"),
    }
    Ok(())
}

fn cmd_status(root: &Path, json: bool) -> Result<()> {
    let rows = collect_status(root)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("serialize status rows")?
        );
    } else {
        print!("{}", render_table(&rows));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_with_context_files() {
        let cli = Cli::parse_from([
            "agl", "init", "add-auth", "--plan", "plan.md", "--context", "notes.md",
            "--context", "api.md",
        ]);
        match cli.command {
            Command::Init {
                slug,
                plan,
                task,
                context,
            } => {
                assert_eq!(slug, "add-auth");
                assert_eq!(plan, PathBuf::from("plan.md"));
                assert!(task.is_none());
                assert_eq!(context.len(), 2);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn parse_work_passes_agent_flags_through() {
        let cli = Cli::parse_from(["agl", "work", "claude", "--model", "opus", "-p"]);
        match cli.command {
            Command::Work(args) => {
                assert_eq!(args.agent, vec!["claude", "--model", "opus", "-p"]);
                assert!(args.dir.is_none());
            }
            _ => panic!("expected work"),
        }
    }

    #[test]
    fn parse_review_separates_own_flags_from_agent() {
        let cli = Cli::parse_from([
            "agl", "review", "--dir", "work/agent-loop/x", "--plan", "extra.md", "codex",
        ]);
        match cli.command {
            Command::Review(args) => {
                assert_eq!(args.dir, Some(PathBuf::from("work/agent-loop/x")));
                assert_eq!(args.plans, vec![PathBuf::from("extra.md")]);
                assert_eq!(args.agent, vec!["codex"]);
            }
            _ => panic!("expected review"),
        }
    }

    #[test]
    fn parse_merge_agent_varargs() {
        let cli = Cli::parse_from(["agl", "merge", "add-auth", "--agent", "claude", "-p"]);
        match cli.command {
            Command::Merge { slug, agent, .. } => {
                assert_eq!(slug.as_deref(), Some("add-auth"));
                assert_eq!(agent, vec!["claude", "-p"]);
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn parse_drop_flags() {
        let cli = Cli::parse_from(["agl", "drop", "add-auth", "--all", "-y"]);
        match cli.command {
            Command::Drop {
                slug, all, yes, ..
            } => {
                assert_eq!(slug.as_deref(), Some("add-auth"));
                assert!(all);
                assert!(yes);
            }
            _ => panic!("expected drop"),
        }
    }
}
