//! I/O helpers for lifecycle commands.

pub mod agent;
pub mod config;
pub mod git;
pub mod meta;
pub mod prompt;
pub mod safety;
pub mod snapshot;
