//! Round-suffix parsing and ordering for the most-recent-prompt resolver.
//!
//! Filesystem timestamps can be coarse enough that a prompt scaffolded for a
//! later round shares its mtime with the round-1 base form, so ordering always
//! breaks timestamp ties by round number.

use std::cmp::Ordering;
use std::time::SystemTime;

/// A prompt file competing in most-recent-prompt resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCandidate {
    pub round: u32,
    pub modified: SystemTime,
}

/// Round encoded in a prompt file name for `stem`, if the name belongs to it.
///
/// `<stem>.md` is round 1; `<stem>-r<N>.md` (N >= 2) is round N. Other names,
/// including a redundant `-r1` suffix, do not belong to the stem.
pub fn parse_round(stem: &str, file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(stem)?;
    if rest == ".md" {
        return Some(1);
    }
    let digits = rest.strip_prefix("-r")?.strip_suffix(".md")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let round: u32 = digits.parse().ok()?;
    (round >= 2).then_some(round)
}

/// Order candidates by (mtime, round); `Greater` means "more recent".
pub fn compare_candidates(a: &PromptCandidate, b: &PromptCandidate) -> Ordering {
    a.modified
        .cmp(&b.modified)
        .then(a.round.cmp(&b.round))
}
