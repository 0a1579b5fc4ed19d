//! Stable exit codes for `issueops` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, missing templates, or any other error.
pub const INVALID: i32 = 1;
/// The pre-sync gate rejected the working folder.
pub const GATE_FAILED: i32 = 2;
/// The agent failed, timed out, or could not be started.
pub const AGENT_FAILED: i32 = 3;
