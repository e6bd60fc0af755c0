//! Loop stages and the round-suffixed names of their artifacts.
//!
//! Naming is a stable contract: prompts live in the loop's `prompts/`
//! directory as `<stem>.md` (round 1) or `<stem>-r<N>.md` (round N > 1), and
//! the matching agent reports in `output/` as `<PREFIX>-<slug>[-r<N>].md`.

use std::str::FromStr;

use anyhow::{Result, anyhow};

/// A lifecycle stage that scaffolds a prompt and hands off to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Work,
    Enhance,
    Review,
    Fix,
}

impl Stage {
    /// Stage name as recorded in `LAST_STAGE` and commit messages.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Work => "work",
            Stage::Enhance => "enhance",
            Stage::Review => "review",
            Stage::Fix => "fix",
        }
    }

    /// Agent-role stem used for prompt file names.
    pub fn prompt_stem(self) -> &'static str {
        match self {
            Stage::Work => "worker",
            Stage::Enhance => "enhancer",
            Stage::Review => "reviewer",
            Stage::Fix => "fixer",
        }
    }

    /// Upper-case prefix used for report file names in the output set.
    pub fn report_prefix(self) -> &'static str {
        match self {
            Stage::Work => "WORK",
            Stage::Enhance => "ENHANCE",
            Stage::Review => "REVIEW",
            Stage::Fix => "FIX",
        }
    }

    /// Prompt file name for this stage at `round`.
    pub fn prompt_file_name(self, round: u32) -> String {
        versioned_name(self.prompt_stem(), round)
    }

    /// Report file name for this stage at `round`, for loop `slug`.
    pub fn report_file_name(self, slug: &str, round: u32) -> String {
        versioned_name(&format!("{}-{slug}", self.report_prefix()), round)
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(Stage::Work),
            "enhance" => Ok(Stage::Enhance),
            "review" => Ok(Stage::Review),
            "fix" => Ok(Stage::Fix),
            other => Err(anyhow!("unknown stage '{other}'")),
        }
    }
}

/// `<stem>.md` for round 1, `<stem>-r<N>.md` for later rounds.
pub fn versioned_name(stem: &str, round: u32) -> String {
    if round <= 1 {
        format!("{stem}.md")
    } else {
        format!("{stem}-r{round}.md")
    }
}

/// Mechanical commit message for a loop commit: `<slug> <stage>[-r<round>]`.
pub fn commit_message(slug: &str, last_stage: &str, round: u32) -> String {
    if round <= 1 {
        format!("{slug} {last_stage}")
    } else {
        format!("{slug} {last_stage}-r{round}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_carry_round_suffix_after_round_one() {
        assert_eq!(Stage::Work.prompt_file_name(1), "worker.md");
        assert_eq!(Stage::Work.prompt_file_name(3), "worker-r3.md");
        assert_eq!(Stage::Fix.prompt_file_name(1), "fixer.md");
        assert_eq!(Stage::Fix.prompt_file_name(2), "fixer-r2.md");
    }

    #[test]
    fn report_names_embed_slug_and_round() {
        assert_eq!(Stage::Review.report_file_name("add-auth", 1), "REVIEW-add-auth.md");
        assert_eq!(Stage::Fix.report_file_name("add-auth", 2), "FIX-add-auth-r2.md");
    }

    #[test]
    fn commit_messages_are_mechanical() {
        assert_eq!(commit_message("add-auth", "work", 1), "add-auth work");
        assert_eq!(commit_message("add-auth", "review", 2), "add-auth review-r2");
    }

    #[test]
    fn stage_parses_from_name() {
        assert_eq!("review".parse::<Stage>().expect("parse"), Stage::Review);
        assert!("deploy".parse::<Stage>().is_err());
    }
}
