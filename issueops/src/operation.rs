//! Orchestration for one operation attempt against a work item.
//!
//! Allocate folder → snapshot body → assemble instructions → invoke agent →
//! parse output → persist artifacts and reports → publish.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::output_parser::{extract_report_records, parse};
use crate::core::types::{
    AgentInvocationResult, InstructionReplacements, OutcomeStatus, ParsedOutput, RecordDefaults,
    ReportRecord, ReportStatus,
};
use crate::io::agent::{AgentInvoker, InvocationRequest};
use crate::io::artifacts::{ArtifactPaths, write_original, write_parsed_artifacts};
use crate::io::config::IssueOpsConfig;
use crate::io::folders::{WorkingFolder, WorkingFolderAllocator};
use crate::io::instructions::{AssembleOptions, assemble_instructions};
use crate::io::lookup_cache::LookupCache;
use crate::io::operation_log::{
    AttemptRecord, OperationIdentity, append_log_entry, now_rfc3339, record_attempt,
};
use crate::io::reports::ReportStore;
use crate::io::tracker::Tracker;
use crate::publish::{PublishContext, PublishOutcome, publish};

/// Parameters for a single `issueops run`.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub work_item_id: String,
    pub operation: String,
    /// Overrides `agent.headed` from config.
    pub headed: Option<bool>,
    /// Overrides `agent.timeout_secs` from config.
    pub timeout: Option<Duration>,
    pub simulate_failure: bool,
}

/// Result of one operation attempt.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub working_folder: WorkingFolder,
    pub invocation: AgentInvocationResult,
    /// `None` when the agent failed and its output was not parsed.
    pub parsed: Option<ParsedOutput>,
    /// Report files written during this attempt, in sequence order.
    pub reports: Vec<String>,
    /// `None` when publishing was not attempted.
    pub publish: Option<PublishOutcome>,
}

/// Run the full lifecycle for one work item and operation.
///
/// Configuration problems (missing templates, malformed operation template,
/// unwritable workspace) are returned as errors. Agent failures and publish
/// failures are reported in the outcome.
#[instrument(skip_all, fields(work_item_id = %request.work_item_id, operation = %request.operation))]
pub fn run_operation<I: AgentInvoker>(
    cfg: &IssueOpsConfig,
    invoker: &I,
    tracker: &dyn Tracker,
    lookup: Option<&LookupCache>,
    request: &OperationRequest,
) -> Result<OperationOutcome> {
    let folder = WorkingFolderAllocator::new(&cfg.workspace_root)
        .allocate(&request.work_item_id, &request.operation)?;
    let paths = ArtifactPaths::new(&folder.path);
    let identity = OperationIdentity {
        work_item_id: request.work_item_id.clone(),
        operation: request.operation.clone(),
        working_folder: folder.path.display().to_string(),
    };
    let store = ReportStore::new(&folder.path, cfg.reports.naming);
    let defaults = RecordDefaults {
        work_item_id: request.work_item_id.clone(),
        operation_name: request.operation.clone(),
        action: "result".to_string(),
        working_folder: identity.working_folder.clone(),
        timestamp: now_rfc3339(),
    };
    let mut reports = Vec::new();

    append_log_entry(
        &folder.path,
        "operation-start",
        &[
            ("work item", request.work_item_id.clone()),
            ("operation", request.operation.clone()),
        ],
    )?;
    record_attempt(&folder.path, &identity, &AttemptRecord::new("operation-start"))?;

    match tracker.get_body(&request.work_item_id) {
        Ok(Some(body)) => write_original(&paths, &body)?,
        Ok(None) => warn!("work item body unavailable, original-issue.md not written"),
        Err(err) => warn!(err = %format!("{err:#}"), "failed to fetch work item body"),
    }

    let replacements = InstructionReplacements {
        work_item_id: request.work_item_id.clone(),
        operation_name: request.operation.clone(),
        working_folder: folder.path.clone(),
    };
    assemble_instructions(
        &cfg.general_template(),
        &cfg.operation_template(&request.operation),
        &replacements,
        &paths.instructions,
        &AssembleOptions {
            save_protocol: cfg.publish.save_protocol,
            simulate_failure: request.simulate_failure,
        },
    )?;

    reports.push(store.write(&lifecycle_record(
        &defaults,
        "start",
        ReportStatus::InProgress,
        "agent invocation started".to_string(),
        None,
    ))?);

    let invocation = invoker.invoke(&InvocationRequest {
        instructions_path: paths.instructions.clone(),
        timeout: request.timeout.or(Some(cfg.agent.timeout())),
        headed: request.headed.unwrap_or(cfg.agent.headed),
        skip_permissions: cfg.agent.skip_permissions,
        workdir: Some(folder.path.clone()),
        log_path: Some(paths.agent_log.clone()),
    });

    if !invocation.success {
        let summary = match (invocation.timed_out, invocation.exit_code) {
            (true, _) => "agent timed out".to_string(),
            (false, Some(code)) => format!("agent exited with code {code}"),
            (false, None) => "agent could not be started".to_string(),
        };
        reports.push(store.write(&lifecycle_record(
            &defaults,
            "agent",
            ReportStatus::Failed,
            summary,
            Some(invocation.stderr.trim().to_string()).filter(|s| !s.is_empty()),
        ))?);
        append_log_entry(
            &folder.path,
            "agent-failed",
            &[
                ("exit code", format!("{:?}", invocation.exit_code)),
                ("timed out", invocation.timed_out.to_string()),
            ],
        )?;
        let mut attempt = AttemptRecord::new("agent-failed");
        attempt.success = Some(false);
        attempt.errors = vec![invocation.stderr.trim().to_string()];
        record_attempt(&folder.path, &identity, &attempt)?;
        return Ok(OperationOutcome {
            working_folder: folder,
            invocation,
            parsed: None,
            reports,
            publish: None,
        });
    }

    let parsed = parse(&invocation.stdout);
    write_parsed_artifacts(&paths, &parsed)?;

    let mut extracted_any = false;
    for extracted in extract_report_records(&invocation.stdout, &parsed) {
        if let Some(filename) = store.write_extracted(&extracted, &defaults)? {
            reports.push(filename);
            extracted_any = true;
        }
    }
    if !extracted_any {
        reports.push(store.write(&lifecycle_record(
            &defaults,
            "result",
            parsed.status.report_status(),
            format!("agent finished with status {:?}", parsed.status),
            None,
        ))?);
    }
    append_log_entry(
        &folder.path,
        "agent-complete",
        &[
            ("status", format!("{:?}", parsed.status)),
            ("comments", parsed.comments.len().to_string()),
            ("reports", reports.len().to_string()),
        ],
    )?;

    let publish_outcome = if parsed.status == OutcomeStatus::Failed {
        warn!("agent output parsed as failed, skipping publish");
        None
    } else {
        let operation_settings = cfg.operation(&request.operation);
        Some(publish(&PublishContext {
            working_folder: &folder.path,
            work_item_id: &request.work_item_id,
            operation: &request.operation,
            tracker,
            lookup,
            settings: &cfg.publish,
            operation_settings: &operation_settings,
        }))
    };

    info!(
        status = ?parsed.status,
        published = publish_outcome.as_ref().is_some_and(|p| p.success),
        folder = %folder.path.display(),
        "operation finished"
    );
    Ok(OperationOutcome {
        working_folder: folder,
        invocation,
        parsed: Some(parsed),
        reports,
        publish: publish_outcome,
    })
}

fn lifecycle_record(
    defaults: &RecordDefaults,
    action: &str,
    status: ReportStatus,
    summary: String,
    payload: Option<String>,
) -> ReportRecord {
    ReportRecord {
        work_item_id: defaults.work_item_id.clone(),
        operation_name: defaults.operation_name.clone(),
        action: action.to_string(),
        working_folder: defaults.working_folder.clone(),
        status,
        timestamp: now_rfc3339(),
        summary,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tracker::OfflineTracker;
    use crate::test_support::{RecordingTracker, ScriptedInvoker, ScriptedRun, TrackerCall};
    use std::fs;
    use std::path::Path;

    const GENERAL: &str = "# Instructions\n\nWork on <ArgIssueId>.\n\n## Working Folder\n\nSave to <ArgWorkingFolder>.\n";
    const REVIEW: &str = "## Review\n\nReview <ArgIssueId> for <ArgOperation>.\n";

    fn config(root: &Path) -> IssueOpsConfig {
        let templates = root.join("templates");
        fs::create_dir_all(&templates).expect("templates dir");
        fs::write(templates.join("general.md"), GENERAL).expect("general");
        fs::write(templates.join("review.md"), REVIEW).expect("review");
        IssueOpsConfig {
            workspace_root: root.join("work"),
            templates_dir: templates,
            ..IssueOpsConfig::default()
        }
    }

    fn request() -> OperationRequest {
        OperationRequest {
            work_item_id: "X-1".to_string(),
            operation: "review".to_string(),
            headed: None,
            timeout: None,
            simulate_failure: false,
        }
    }

    #[test]
    fn completed_run_publishes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let invoker = ScriptedInvoker::new(vec![ScriptedRun::success(
            "## Revised Issue\n\nBetter body.\n\n## Comment\n\nLooks good.\n",
        )]);
        let tracker = RecordingTracker::default().with_body("Old body.");

        let outcome =
            run_operation(&cfg, &invoker, &tracker, None, &request()).expect("run operation");

        let parsed = outcome.parsed.expect("parsed");
        assert_eq!(parsed.status, OutcomeStatus::Completed);
        assert_eq!(outcome.reports, vec!["report-start-1.md", "report-result-2.md"]);
        let publish = outcome.publish.expect("published");
        assert!(publish.success, "{:?}", publish.errors);
        assert!(publish.uploaded_assets.issue_body);
        assert_eq!(publish.uploaded_assets.comments, vec!["comment-001.md"]);

        let instructions = fs::read_to_string(&invoker.requests()[0].instructions_path)
            .expect("instructions");
        assert!(instructions.contains("Review X-1 for review."));
        assert!(!instructions.contains("<ArgIssueId>"));
        assert!(tracker.calls().contains(&TrackerCall::AddComment {
            id: "X-1".to_string(),
            text: "Looks good.".to_string(),
        }));
    }

    #[test]
    fn agent_failure_records_failed_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let invoker = ScriptedInvoker::new(vec![ScriptedRun::failure(2, "boom")]);

        let outcome = run_operation(&cfg, &invoker, &OfflineTracker, None, &request())
            .expect("run operation");

        assert!(!outcome.invocation.success);
        assert!(outcome.parsed.is_none());
        assert!(outcome.publish.is_none());
        let store = ReportStore::new(&outcome.working_folder.path, cfg.reports.naming);
        assert_eq!(
            store.latest_status().expect("latest"),
            Some(ReportStatus::Failed)
        );
    }

    /// Without a body snapshot the gate rejects publishing but the run still succeeds.
    #[test]
    fn missing_original_blocks_publish_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let invoker =
            ScriptedInvoker::new(vec![ScriptedRun::success("## Revised Issue\n\nNew.\n")]);

        let outcome = run_operation(&cfg, &invoker, &OfflineTracker, None, &request())
            .expect("run operation");

        let publish = outcome.publish.expect("publish attempted");
        assert!(!publish.success);
        assert!(!publish.validation.is_valid);
        assert!(
            publish
                .errors
                .iter()
                .any(|e| e.contains("original issue snapshot is missing"))
        );
    }

    #[test]
    fn missing_operation_template_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let invoker = ScriptedInvoker::new(Vec::new());
        let mut req = request();
        req.operation = "groom".to_string();

        let err = run_operation(&cfg, &invoker, &OfflineTracker, None, &req).unwrap_err();
        assert!(format!("{err:#}").contains("not found"));
        assert!(invoker.requests().is_empty());
    }
}
