//! Deterministic, pure logic for the operation lifecycle.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod folder_naming;
pub mod headings;
pub mod output_parser;
pub mod report_format;
pub mod report_naming;
pub mod sync_checks;
pub mod types;
