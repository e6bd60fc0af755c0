//! Deterministic, pure logic shared by the lifecycle commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod layout;
pub mod round;
pub mod slug;
pub mod stage;
