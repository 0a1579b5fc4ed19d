//! Individual pre-sync checks.
//!
//! Each check is a pure function returning the errors it found (empty when it
//! passes). The validator runs every check and concatenates the results.

use crate::core::types::ReportStatus;

pub const NO_CHANGES: &str = "no changes made";

/// Original and revised bodies must both exist and differ byte-for-byte.
pub fn check_changes(original: Option<&[u8]>, revised: Option<&[u8]>) -> Vec<String> {
    let mut errors = Vec::new();
    if original.is_none() {
        errors.push("original issue snapshot is missing".to_string());
    }
    if revised.is_none() {
        errors.push("revised issue body is missing".to_string());
    }
    if let (Some(original), Some(revised)) = (original, revised)
        && original == revised
    {
        errors.push(format!(
            "{NO_CHANGES}: revised issue body is identical to the original"
        ));
    }
    errors
}

pub fn check_reports_present(report_filenames: &[String]) -> Vec<String> {
    if report_filenames.is_empty() {
        vec!["no report files found".to_string()]
    } else {
        Vec::new()
    }
}

/// The latest report must be terminal, and terminal-but-failed is not publishable.
pub fn check_terminal_status(latest: Option<ReportStatus>) -> Vec<String> {
    match latest {
        None => vec!["no report status available".to_string()],
        Some(status) if !status.is_terminal() => vec![format!(
            "latest report status '{status}' is not terminal"
        )],
        Some(status) if !status.is_publishable() => vec![format!(
            "latest report status '{status}' is not publishable (expected Blocked or Complete)"
        )],
        Some(_) => Vec::new(),
    }
}

/// Compare the remote status with the one expected for the operation (case-insensitive).
pub fn check_remote_status(expected: &str, actual: &str) -> Vec<String> {
    if expected.trim().eq_ignore_ascii_case(actual.trim()) {
        Vec::new()
    } else {
        vec![format!(
            "remote status '{actual}' does not match expected '{expected}'"
        )]
    }
}
