//! Operation lifecycle orchestrator for tracked work items.
//!
//! Each operation attempt gets its own working folder. The orchestrator
//! assembles instructions, supervises a coding-agent subprocess, parses its
//! output into artifacts and sequenced report files, and publishes the result
//! to the tracker once the pre-sync gate passes. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, naming, checks).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, subprocesses, file
//!   locks, tracker collaborator). Isolated behind traits to enable scripted
//!   collaborators in tests.
//!
//! Orchestration modules ([`operation`], [`validate`], [`publish`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod operation;
pub mod publish;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
