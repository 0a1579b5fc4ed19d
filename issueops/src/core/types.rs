//! Shared deterministic types for the operation lifecycle.
//!
//! These types define the contracts between the parser, the report sequencer,
//! the pre-sync gate, and the publish step. They carry no I/O.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Terminal outcome derived from agent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Completed,
    Blocked,
    Failed,
}

impl OutcomeStatus {
    /// Report status recorded for this outcome.
    pub fn report_status(self) -> ReportStatus {
        match self {
            OutcomeStatus::Completed => ReportStatus::Complete,
            OutcomeStatus::Blocked => ReportStatus::Blocked,
            OutcomeStatus::Failed => ReportStatus::Failed,
        }
    }
}

/// Status carried by a report record.
///
/// `InProgress` is the only non-terminal status. Of the terminal ones only
/// `Blocked` and `Complete` may be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "In Progress", alias = "InProgress")]
    InProgress,
    Failed,
    Blocked,
    #[serde(alias = "Completed")]
    Complete,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::InProgress => "In Progress",
            ReportStatus::Failed => "Failed",
            ReportStatus::Blocked => "Blocked",
            ReportStatus::Complete => "Complete",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReportStatus::InProgress)
    }

    pub fn is_publishable(self) -> bool {
        matches!(self, ReportStatus::Blocked | ReportStatus::Complete)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ReportFieldError;

    /// Lenient parse: case, spaces, `_` and `-` are ignored.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "inprogress" => Ok(ReportStatus::InProgress),
            "failed" => Ok(ReportStatus::Failed),
            "blocked" => Ok(ReportStatus::Blocked),
            "complete" | "completed" => Ok(ReportStatus::Complete),
            _ => Err(ReportFieldError::new(
                "status",
                format!("'{raw}' is not one of In Progress, Failed, Blocked, Complete"),
            )),
        }
    }
}

/// A required report field was missing or invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFieldError {
    pub field: &'static str,
    pub reason: String,
}

impl ReportFieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    fn missing(field: &'static str) -> Self {
        Self::new(field, "missing or empty")
    }
}

impl fmt::Display for ReportFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid report field '{}': {}", self.field, self.reason)
    }
}

impl std::error::Error for ReportFieldError {}

/// Fenced structured block as emitted by the agent or stored in a report file.
///
/// All fields are optional at this layer; [`StatusBlock::into_record`] decides
/// which are required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBlock {
    #[serde(default, alias = "issueId", skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StatusBlock {
    /// Parsed status, if present and recognized.
    pub fn report_status(&self) -> Option<ReportStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }

    /// Convert into a full record, filling identity fields from `defaults`.
    ///
    /// `status` is never defaulted: a missing or unknown status is an error.
    pub fn into_record(
        self,
        payload: Option<String>,
        defaults: &RecordDefaults,
    ) -> Result<ReportRecord, ReportFieldError> {
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| ReportFieldError::missing("status"))?
            .parse::<ReportStatus>()?;
        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        let record = ReportRecord {
            work_item_id: pick(self.work_item_id, &defaults.work_item_id),
            operation_name: pick(self.operation, &defaults.operation_name),
            action: pick(self.action, &defaults.action),
            working_folder: pick(self.working_folder, &defaults.working_folder),
            status,
            timestamp: pick(self.timestamp, &defaults.timestamp),
            summary: pick(self.summary, ""),
            payload,
        };
        record.validate()?;
        Ok(record)
    }
}

/// Identity values used when a block omits them.
#[derive(Debug, Clone, Default)]
pub struct RecordDefaults {
    pub work_item_id: String,
    pub operation_name: String,
    pub action: String,
    pub working_folder: String,
    pub timestamp: String,
}

/// One lifecycle event persisted as a `report-<action>-<seq>.md` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub work_item_id: String,
    pub operation_name: String,
    pub action: String,
    pub working_folder: String,
    pub status: ReportStatus,
    pub timestamp: String,
    pub summary: String,
    pub payload: Option<String>,
}

impl ReportRecord {
    /// Check that every required field is non-empty.
    pub fn validate(&self) -> Result<(), ReportFieldError> {
        let required = [
            ("workItemId", &self.work_item_id),
            ("operation", &self.operation_name),
            ("action", &self.action),
            ("workingFolder", &self.working_folder),
            ("timestamp", &self.timestamp),
            ("summary", &self.summary),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ReportFieldError::missing(field));
            }
        }
        Ok(())
    }

    /// Structured block view of this record (no payload).
    pub fn to_block(&self) -> StatusBlock {
        StatusBlock {
            work_item_id: Some(self.work_item_id.clone()),
            operation: Some(self.operation_name.clone()),
            action: Some(self.action.clone()),
            working_folder: Some(self.working_folder.clone()),
            status: Some(self.status.as_str().to_string()),
            timestamp: Some(self.timestamp.clone()),
            summary: Some(self.summary.clone()),
        }
    }
}

/// Structured result of scanning agent stdout. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOutput {
    pub status: OutcomeStatus,
    pub revised_body: Option<String>,
    pub comments: Vec<String>,
    pub blocking_questions: Vec<String>,
    pub embedded_report: Option<StatusBlock>,
    pub context_note: Option<String>,
}

/// A report block found in agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReport {
    pub filename: String,
    pub content: String,
}

/// Values substituted into instruction template placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionReplacements {
    pub work_item_id: String,
    pub operation_name: String,
    pub working_folder: PathBuf,
}

/// Result of one agent subprocess invocation.
///
/// `success` is true iff the process exited with code 0. Timeouts and spawn
/// failures are reported here, never as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocationResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub timed_out: bool,
}

impl AgentInvocationResult {
    /// Failure result for a process that never produced output.
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            timed_out: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_status_parses_leniently() {
        assert_eq!("In Progress".parse::<ReportStatus>(), Ok(ReportStatus::InProgress));
        assert_eq!("in_progress".parse::<ReportStatus>(), Ok(ReportStatus::InProgress));
        assert_eq!("COMPLETED".parse::<ReportStatus>(), Ok(ReportStatus::Complete));
        assert_eq!("blocked".parse::<ReportStatus>(), Ok(ReportStatus::Blocked));
        let err = "Done".parse::<ReportStatus>().unwrap_err();
        assert_eq!(err.field, "status");
    }

    #[test]
    fn only_blocked_and_complete_are_publishable() {
        assert!(!ReportStatus::InProgress.is_terminal());
        assert!(ReportStatus::Failed.is_terminal());
        assert!(!ReportStatus::Failed.is_publishable());
        assert!(ReportStatus::Blocked.is_publishable());
        assert!(ReportStatus::Complete.is_publishable());
    }

    #[test]
    fn block_into_record_fills_identity_defaults() {
        let block = StatusBlock {
            status: Some("Complete".to_string()),
            summary: Some("done".to_string()),
            ..StatusBlock::default()
        };
        let defaults = RecordDefaults {
            work_item_id: "X-1".to_string(),
            operation_name: "review".to_string(),
            action: "result".to_string(),
            working_folder: "/tmp/op".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        let record = block.into_record(None, &defaults).expect("record");
        assert_eq!(record.work_item_id, "X-1");
        assert_eq!(record.status, ReportStatus::Complete);
        assert_eq!(record.summary, "done");
    }

    #[test]
    fn block_without_status_is_rejected() {
        let block = StatusBlock {
            summary: Some("done".to_string()),
            ..StatusBlock::default()
        };
        let err = block
            .into_record(None, &RecordDefaults::default())
            .unwrap_err();
        assert_eq!(err.field, "status");
    }

    #[test]
    fn record_validation_names_the_empty_field() {
        let record = ReportRecord {
            work_item_id: "X-1".to_string(),
            operation_name: "review".to_string(),
            action: "start".to_string(),
            working_folder: "/tmp".to_string(),
            status: ReportStatus::InProgress,
            timestamp: "t".to_string(),
            summary: "  ".to_string(),
            payload: None,
        };
        assert_eq!(record.validate().unwrap_err().field, "summary");
    }
}
