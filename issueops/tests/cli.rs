//! CLI tests for the `issueops` binary.
//!
//! Spawns the binary and checks exit codes and printed diagnostics.

use std::fs;
use std::process::Command;

use issueops::core::types::ReportStatus;
use issueops::exit_codes;
use issueops::io::config::{DEFAULT_CONFIG_FILE, IssueOpsConfig, ReportNaming, write_config};
use issueops::io::reports::ReportStore;
use issueops::test_support::report_record;

fn issueops(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_issueops"));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn validate_reports_gate_failures() {
    let temp = tempfile::tempdir().expect("tempdir");
    let folder = temp.path().join("op");
    fs::create_dir_all(&folder).expect("folder");
    fs::write(folder.join("original-issue.md"), "same").expect("original");
    fs::write(folder.join("revised-issue.md"), "same").expect("revised");

    let output = issueops(temp.path())
        .arg("validate")
        .arg(&folder)
        .output()
        .expect("issueops validate");

    assert_eq!(output.status.code(), Some(exit_codes::GATE_FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no changes made"), "{stdout}");
    assert!(stdout.contains("no report files found"), "{stdout}");
}

#[test]
fn validate_json_for_ready_folder() {
    let temp = tempfile::tempdir().expect("tempdir");
    let folder = temp.path().join("op");
    fs::create_dir_all(&folder).expect("folder");
    fs::write(folder.join("original-issue.md"), "before").expect("original");
    fs::write(folder.join("revised-issue.md"), "after").expect("revised");
    ReportStore::new(&folder, ReportNaming::Sequence)
        .write(&report_record("result", ReportStatus::Complete))
        .expect("report");

    let output = issueops(temp.path())
        .args(["validate", "--json"])
        .arg(&folder)
        .output()
        .expect("issueops validate");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("validation json");
    assert_eq!(result["isValid"], serde_json::json!(true));
    assert_eq!(result["assets"]["terminalStatus"], serde_json::json!("Complete"));
}

#[test]
fn missing_working_folder_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = issueops(temp.path())
        .args(["publish", "does-not-exist", "X-1", "review"])
        .output()
        .expect("issueops publish");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("working folder not found"));
}

#[test]
fn check_agent_reports_missing_executable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = IssueOpsConfig::default();
    cfg.agent.command = temp
        .path()
        .join("no-such-agent")
        .display()
        .to_string();
    write_config(&temp.path().join(DEFAULT_CONFIG_FILE), &cfg).expect("write config");

    let status = issueops(temp.path())
        .arg("check-agent")
        .status()
        .expect("issueops check-agent");

    assert_eq!(status.code(), Some(exit_codes::AGENT_FAILED));
}

/// Without a tracker credential the refresh fails softly and the cache stays absent.
#[test]
fn refresh_cache_without_credential_is_non_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = issueops(temp.path())
        .args(["refresh-cache", "--force"])
        .output()
        .expect("issueops refresh-cache");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("not refreshed"));
    assert!(
        !temp
            .path()
            .join(".issueops/cache/workflow-states.json")
            .exists()
    );
}
