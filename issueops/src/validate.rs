//! Pre-sync gate: can this working folder be published?
//!
//! Every check runs; all failures are collected. The result is recomputed on
//! each call because folder contents change between attempts.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::sync_checks::{
    check_changes, check_remote_status, check_reports_present, check_terminal_status,
};
use crate::core::types::ReportStatus;
use crate::io::artifacts::{ArtifactPaths, read_optional};
use crate::io::config::ReportNaming;
use crate::io::reports::ReportStore;
use crate::io::tracker::Tracker;

pub struct ValidationContext<'a> {
    pub working_folder: &'a Path,
    pub work_item_id: &'a str,
    /// Remote status the work item should currently have; `None` skips the check.
    pub expected_remote_status: Option<&'a str>,
    pub tracker: Option<&'a dyn Tracker>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationAssets {
    pub has_revised_body: bool,
    pub report_filenames: Vec<String>,
    pub has_terminal_status: bool,
    pub terminal_status: Option<ReportStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Non-blocking problems, e.g. the remote status could not be checked.
    pub warnings: Vec<String>,
    pub assets: ValidationAssets,
}

pub fn validate_working_folder(ctx: &ValidationContext<'_>) -> ValidationResult {
    let mut result = ValidationResult::default();
    let paths = ArtifactPaths::new(ctx.working_folder);

    let original = read_or_record(&paths.original_issue, &mut result.errors);
    let revised = read_or_record(&paths.revised_issue, &mut result.errors);
    result.assets.has_revised_body = revised.is_some();
    result
        .errors
        .extend(check_changes(original.as_deref(), revised.as_deref()));

    let store = ReportStore::new(ctx.working_folder, ReportNaming::default());
    match store.list() {
        Ok(entries) => {
            result.assets.report_filenames = entries.into_iter().map(|e| e.filename).collect();
        }
        Err(err) => result.errors.push(format!("cannot list reports: {err:#}")),
    }
    result
        .errors
        .extend(check_reports_present(&result.assets.report_filenames));

    let latest = match store.latest_status() {
        Ok(latest) => latest,
        Err(err) => {
            result.errors.push(format!("latest report unreadable: {err:#}"));
            None
        }
    };
    result.assets.terminal_status = latest.filter(|status| status.is_terminal());
    result.assets.has_terminal_status = result.assets.terminal_status.is_some();
    if !result.assets.report_filenames.is_empty() {
        result.errors.extend(check_terminal_status(latest));
    }

    if let (Some(tracker), Some(expected)) = (ctx.tracker, ctx.expected_remote_status) {
        match tracker.get_status(ctx.work_item_id) {
            Ok(Some(actual)) => result.errors.extend(check_remote_status(expected, &actual)),
            Ok(None) => result.warnings.push(format!(
                "remote status of {} unavailable, consistency not verified",
                ctx.work_item_id
            )),
            Err(err) => result.warnings.push(format!(
                "remote status check for {} failed: {err:#}",
                ctx.work_item_id
            )),
        }
    }

    for warning in &result.warnings {
        warn!(folder = %ctx.working_folder.display(), "{warning}");
    }
    result.is_valid = result.errors.is_empty();
    debug!(
        is_valid = result.is_valid,
        errors = result.errors.len(),
        "pre-sync validation finished"
    );
    result
}

fn read_or_record(path: &Path, errors: &mut Vec<String>) -> Option<Vec<u8>> {
    match read_optional(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            errors.push(format!("{err:#}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ReportRecord;
    use crate::test_support::{RecordingTracker, report_record};
    use std::fs;

    fn seed(dir: &Path, original: &str, revised: &str, status: ReportStatus) {
        fs::write(dir.join("original-issue.md"), original).expect("original");
        fs::write(dir.join("revised-issue.md"), revised).expect("revised");
        let store = ReportStore::new(dir, ReportNaming::Sequence);
        let record: ReportRecord = report_record("result", status);
        store.write(&record).expect("report");
    }

    fn context<'a>(dir: &'a Path, tracker: Option<&'a dyn Tracker>) -> ValidationContext<'a> {
        ValidationContext {
            working_folder: dir,
            work_item_id: "X-1",
            expected_remote_status: Some("In Review"),
            tracker,
        }
    }

    #[test]
    fn ready_folder_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed(temp.path(), "old", "new", ReportStatus::Complete);
        let result = validate_working_folder(&context(temp.path(), None));
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.assets.has_revised_body);
        assert_eq!(result.assets.report_filenames, vec!["report-result-1.md"]);
        assert_eq!(result.assets.terminal_status, Some(ReportStatus::Complete));
    }

    /// Identical bodies fail regardless of what the reports say.
    #[test]
    fn identical_bodies_fail_with_no_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed(temp.path(), "same", "same", ReportStatus::Complete);
        let result = validate_working_folder(&context(temp.path(), None));
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("no changes made")));
    }

    /// A report the agent saved itself, following the save protocol, counts.
    #[test]
    fn agent_saved_report_passes_gate() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("original-issue.md"), "old").expect("original");
        fs::write(temp.path().join("revised-issue.md"), "new").expect("revised");
        fs::write(
            temp.path().join("report-review-1.md"),
            "# Operation Report\n\n```json\n{\"workItemId\": \"X-1\", \"operation\": \"review\", \"action\": \"review\", \"status\": \"Complete\", \"summary\": \"done\"}\n```\n",
        )
        .expect("agent report");
        let result = validate_working_folder(&context(temp.path(), None));
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.assets.report_filenames, vec!["report-review-1.md"]);
    }

    #[test]
    fn collects_every_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = validate_working_folder(&context(temp.path(), None));
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(result.errors.iter().any(|e| e.contains("no report files")));
    }

    #[test]
    fn failed_status_is_not_publishable() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed(temp.path(), "old", "new", ReportStatus::Failed);
        let result = validate_working_folder(&context(temp.path(), None));
        assert!(!result.is_valid);
        assert!(result.assets.has_terminal_status);
        assert!(result.errors[0].contains("not publishable"));
    }

    #[test]
    fn remote_mismatch_fails_but_errors_only_warn() {
        let temp = tempfile::tempdir().expect("tempdir");
        seed(temp.path(), "old", "new", ReportStatus::Blocked);

        let mismatched = RecordingTracker::default().with_status("Done");
        let result = validate_working_folder(&context(temp.path(), Some(&mismatched)));
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("does not match"));

        let failing = RecordingTracker::default().failing_status();
        let result = validate_working_folder(&context(temp.path(), Some(&failing)));
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);
    }
}
