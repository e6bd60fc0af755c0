//! Feature-loop lifecycle manager for git worktrees.
//!
//! Each feature loop pairs an isolated branch and worktree with a loop
//! directory holding prompts, reports, and context snapshots. The crate
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (slug grammar, stage and round
//!   naming, directory layout). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (metadata records, git, prompt
//!   scaffolding, agent processes) plus the path-safety validation that gates
//!   every destructive operation.
//!
//! Orchestration modules ([`init`], [`stage`], [`commit`], [`merge`],
//! [`drop`], [`status`]) coordinate core logic with I/O to implement the CLI
//! commands; [`resolve`] picks the loop a command addresses.

pub mod commit;
pub mod core;
pub mod drop;
pub mod init;
pub mod io;
pub mod logging;
pub mod merge;
pub mod resolve;
pub mod stage;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
