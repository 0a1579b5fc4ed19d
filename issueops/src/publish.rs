//! Publish step: push a validated working folder back to the tracker.
//!
//! The pre-sync gate runs first and a rejection stops everything. After that
//! each artifact class (comments, body, status transition) is attempted
//! independently; one failing class never prevents the others. Nothing in
//! here returns `Err`: unexpected failures become entries in
//! [`PublishOutcome::errors`] after a best-effort failure log.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::types::ReportStatus;
use crate::io::artifacts::{ArtifactPaths, comment_files};
use crate::io::config::{OperationConfig, PublishConfig, ReportNaming};
use crate::io::lookup_cache::LookupCache;
use crate::io::operation_log::{
    AttemptRecord, OperationIdentity, append_log_entry, mark_comment_published,
    published_comments, record_attempt,
};
use crate::io::reports::ReportStore;
use crate::io::tracker::{Tracker, WorkflowState};
use crate::validate::{ValidationContext, ValidationResult, validate_working_folder};

pub struct PublishContext<'a> {
    pub working_folder: &'a Path,
    pub work_item_id: &'a str,
    pub operation: &'a str,
    pub tracker: &'a dyn Tracker,
    /// Resolves status names to ids; without it the tracker gets the name only.
    pub lookup: Option<&'a LookupCache>,
    pub settings: &'a PublishConfig,
    pub operation_settings: &'a OperationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAssets {
    /// Comment files posted during this call.
    pub comments: Vec<String>,
    pub issue_body: bool,
    /// Status the work item was moved to.
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub success: bool,
    pub uploaded_assets: UploadedAssets,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub validation: ValidationResult,
}

#[instrument(skip_all, fields(work_item_id = ctx.work_item_id, operation = ctx.operation, folder = %ctx.working_folder.display()))]
pub fn publish(ctx: &PublishContext<'_>) -> PublishOutcome {
    let validation = validate_working_folder(&ValidationContext {
        working_folder: ctx.working_folder,
        work_item_id: ctx.work_item_id,
        expected_remote_status: ctx.operation_settings.expected_status.as_deref(),
        tracker: Some(ctx.tracker),
    });
    let identity = OperationIdentity {
        work_item_id: ctx.work_item_id.to_string(),
        operation: ctx.operation.to_string(),
        working_folder: ctx.working_folder.display().to_string(),
    };

    if !validation.is_valid {
        warn!(errors = validation.errors.len(), "pre-sync gate rejected working folder");
        let outcome = PublishOutcome {
            success: false,
            errors: validation.errors.clone(),
            warnings: validation.warnings.clone(),
            validation,
            ..PublishOutcome::default()
        };
        log_best_effort(ctx.working_folder, &identity, "publish-rejected", &outcome);
        return outcome;
    }

    let attempt = (|| -> Result<PublishOutcome> {
        append_log_entry(
            ctx.working_folder,
            "publish-start",
            &[
                ("work item", ctx.work_item_id.to_string()),
                ("operation", ctx.operation.to_string()),
            ],
        )?;
        record_attempt(ctx.working_folder, &identity, &AttemptRecord::new("publish-start"))?;

        let mut outcome = PublishOutcome {
            warnings: validation.warnings.clone(),
            validation: validation.clone(),
            ..PublishOutcome::default()
        };
        publish_comments(ctx, &identity, &mut outcome);
        publish_body(ctx, &mut outcome);
        publish_status(ctx, &mut outcome);
        outcome.success = outcome.errors.is_empty();

        append_log_entry(ctx.working_folder, "publish-complete", &log_details(&outcome))?;
        record_attempt(
            ctx.working_folder,
            &identity,
            &attempt_record("publish-complete", &outcome),
        )?;
        Ok(outcome)
    })();

    match attempt {
        Ok(outcome) => {
            info!(
                success = outcome.success,
                comments = outcome.uploaded_assets.comments.len(),
                issue_body = outcome.uploaded_assets.issue_body,
                "publish finished"
            );
            outcome
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "publish aborted");
            let outcome = PublishOutcome {
                success: false,
                errors: vec![format!("publish aborted: {err:#}")],
                warnings: validation.warnings.clone(),
                validation,
                ..PublishOutcome::default()
            };
            log_best_effort(ctx.working_folder, &identity, "publish-failed", &outcome);
            outcome
        }
    }
}

fn publish_comments(
    ctx: &PublishContext<'_>,
    identity: &OperationIdentity,
    outcome: &mut PublishOutcome,
) {
    if ctx.settings.suppress_comments {
        debug!("comment publishing suppressed");
        return;
    }
    // Comments are never posted without a readable published list.
    let already = match published_comments(ctx.working_folder) {
        Ok(already) => already,
        Err(err) => {
            outcome.errors.push(format!("comments: {err:#}"));
            return;
        }
    };
    let paths = match comment_files(ctx.working_folder) {
        Ok(paths) => paths,
        Err(err) => {
            outcome.errors.push(format!("comments: {err:#}"));
            return;
        }
    };
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if already.contains(&name) {
            debug!(comment = %name, "comment already published");
            continue;
        }
        let text = match fs::read_to_string(&path)
            .with_context(|| format!("read comment {}", path.display()))
        {
            Ok(text) => text,
            Err(err) => {
                outcome.errors.push(format!("comment {name}: {err:#}"));
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        match ctx.tracker.add_comment(ctx.work_item_id, text.trim()) {
            Ok(true) => {
                if let Err(err) = mark_comment_published(ctx.working_folder, identity, &name) {
                    warn!(comment = %name, err = %format!("{err:#}"), "failed to record published comment");
                }
                outcome.uploaded_assets.comments.push(name);
            }
            Ok(false) => outcome
                .warnings
                .push(format!("comment {name} skipped by tracker")),
            Err(err) => outcome.errors.push(format!("comment {name}: {err:#}")),
        }
    }
}

fn publish_body(ctx: &PublishContext<'_>, outcome: &mut PublishOutcome) {
    if ctx.settings.suppress_body {
        debug!("body publishing suppressed");
        return;
    }
    let path = ArtifactPaths::new(ctx.working_folder).revised_issue;
    let body = match fs::read_to_string(&path)
        .with_context(|| format!("read revised body {}", path.display()))
    {
        Ok(body) => body,
        Err(err) => {
            outcome.errors.push(format!("body update: {err:#}"));
            return;
        }
    };
    match ctx.tracker.update_body(ctx.work_item_id, &body) {
        Ok(true) => outcome.uploaded_assets.issue_body = true,
        Ok(false) => outcome.warnings.push("body update skipped by tracker".to_string()),
        Err(err) => outcome.errors.push(format!("body update: {err:#}")),
    }
}

fn publish_status(ctx: &PublishContext<'_>, outcome: &mut PublishOutcome) {
    let latest = match ReportStore::new(ctx.working_folder, ReportNaming::default()).latest_status()
    {
        Ok(latest) => latest,
        Err(err) => {
            outcome.errors.push(format!("status transition: {err:#}"));
            return;
        }
    };
    let target = match latest {
        Some(ReportStatus::Complete) => ctx.operation_settings.complete_status.as_deref(),
        Some(ReportStatus::Blocked) => ctx.operation_settings.blocked_status.as_deref(),
        _ => None,
    };
    let Some(name) = target else {
        debug!(status = ?latest, "no status transition configured");
        return;
    };

    let state = match ctx.lookup {
        Some(cache) => cache.resolve(ctx.tracker, name),
        None => WorkflowState {
            name: name.to_string(),
            id: None,
        },
    };
    match ctx.tracker.update_status(ctx.work_item_id, &state) {
        Ok(true) => outcome.uploaded_assets.status = Some(state.name),
        Ok(false) => outcome
            .warnings
            .push(format!("status transition to '{name}' skipped by tracker")),
        Err(err) => outcome
            .errors
            .push(format!("status transition to '{name}': {err:#}")),
    }
}

fn log_details(outcome: &PublishOutcome) -> Vec<(&'static str, String)> {
    let mut details = vec![
        ("success", outcome.success.to_string()),
        (
            "comments",
            outcome.uploaded_assets.comments.len().to_string(),
        ),
        ("issue body", outcome.uploaded_assets.issue_body.to_string()),
        (
            "status",
            outcome
                .uploaded_assets
                .status
                .clone()
                .unwrap_or_else(|| "unchanged".to_string()),
        ),
    ];
    for error in &outcome.errors {
        details.push(("error", error.clone()));
    }
    details
}

fn attempt_record(event: &str, outcome: &PublishOutcome) -> AttemptRecord {
    let mut attempt = AttemptRecord::new(event);
    attempt.success = Some(outcome.success);
    attempt.errors = outcome.errors.clone();
    attempt.uploaded_assets = serde_json::to_value(&outcome.uploaded_assets).ok();
    attempt
}

fn log_best_effort(dir: &Path, identity: &OperationIdentity, event: &str, outcome: &PublishOutcome) {
    if let Err(err) = append_log_entry(dir, event, &log_details(outcome)) {
        warn!(err = %format!("{err:#}"), event, "failed to append operation log");
    }
    if let Err(err) = record_attempt(dir, identity, &attempt_record(event, outcome)) {
        warn!(err = %format!("{err:#}"), event, "failed to update operation report");
    }
}
