//! Side-effecting adapters: filesystem, subprocesses, tracker, cache.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod folders;
pub mod fs_atomic;
pub mod instructions;
pub mod lookup_cache;
pub mod operation_log;
pub mod process;
pub mod reports;
pub mod tracker;
