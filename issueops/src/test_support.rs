//! Test-only helpers: deterministic records and scripted collaborators.

use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{AgentInvocationResult, ReportRecord, ReportStatus};
use crate::io::agent::{AgentInvoker, InvocationRequest};
use crate::io::tracker::{LookupSource, LookupTable, Tracker, WorkflowState};

/// Create a valid report record for work item `X-1`, operation `review`.
pub fn report_record(action: &str, status: ReportStatus) -> ReportRecord {
    ReportRecord {
        work_item_id: "X-1".to_string(),
        operation_name: "review".to_string(),
        action: action.to_string(),
        working_folder: "ops/X-1/review".to_string(),
        status,
        timestamp: "2026-01-02T03:04:05Z".to_string(),
        summary: format!("{action} finished"),
        payload: None,
    }
}

/// Build a lookup table from `(name, id)` pairs.
pub fn lookup_table(states: &[(&str, &str)]) -> LookupTable {
    LookupTable {
        name_to_id: states
            .iter()
            .map(|(name, id)| (name.to_string(), id.to_string()))
            .collect(),
        source_groups: vec!["team-core".to_string()],
    }
}

/// A remote call observed by [`RecordingTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    GetStatus(String),
    GetBody(String),
    UpdateStatus {
        id: String,
        name: String,
        state_id: Option<String>,
    },
    AddComment { id: String, text: String },
    UpdateBody { id: String, text: String },
    FetchLookup,
}

/// In-memory tracker that records every call and fails on request.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    status: Option<String>,
    body: Option<String>,
    lookup: LookupTable,
    fail_status: bool,
    fail_comments: bool,
    fail_body: bool,
    fail_transition: bool,
    calls: Mutex<Vec<TrackerCall>>,
}

impl RecordingTracker {
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_lookup(mut self, states: &[(&str, &str)]) -> Self {
        self.lookup = lookup_table(states);
        self
    }

    /// `get_status` errors.
    pub fn failing_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    pub fn failing_comments(mut self) -> Self {
        self.fail_comments = true;
        self
    }

    pub fn failing_body(mut self) -> Self {
        self.fail_body = true;
        self
    }

    /// `update_status` errors.
    pub fn failing_transition(mut self) -> Self {
        self.fail_transition = true;
        self
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: TrackerCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl LookupSource for RecordingTracker {
    fn fetch_lookup(&self) -> Result<LookupTable> {
        self.record(TrackerCall::FetchLookup);
        Ok(self.lookup.clone())
    }
}

impl Tracker for RecordingTracker {
    fn get_status(&self, work_item_id: &str) -> Result<Option<String>> {
        self.record(TrackerCall::GetStatus(work_item_id.to_string()));
        if self.fail_status {
            return Err(anyhow!("status lookup failed"));
        }
        Ok(self.status.clone())
    }

    fn get_body(&self, work_item_id: &str) -> Result<Option<String>> {
        self.record(TrackerCall::GetBody(work_item_id.to_string()));
        Ok(self.body.clone())
    }

    fn update_status(&self, work_item_id: &str, state: &WorkflowState) -> Result<bool> {
        self.record(TrackerCall::UpdateStatus {
            id: work_item_id.to_string(),
            name: state.name.clone(),
            state_id: state.id.clone(),
        });
        if self.fail_transition {
            return Err(anyhow!("status transition rejected"));
        }
        Ok(true)
    }

    fn add_comment(&self, work_item_id: &str, text: &str) -> Result<bool> {
        self.record(TrackerCall::AddComment {
            id: work_item_id.to_string(),
            text: text.to_string(),
        });
        if self.fail_comments {
            return Err(anyhow!("comment rejected"));
        }
        Ok(true)
    }

    fn update_body(&self, work_item_id: &str, text: &str) -> Result<bool> {
        self.record(TrackerCall::UpdateBody {
            id: work_item_id.to_string(),
            text: text.to_string(),
        });
        if self.fail_body {
            return Err(anyhow!("body update rejected"));
        }
        Ok(true)
    }

    fn check_connection(&self) -> bool {
        true
    }
}

/// One scripted agent run: the result to return plus files the "agent" saves
/// into the working folder before exiting.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub result: AgentInvocationResult,
    pub files: Vec<(String, String)>,
}

impl ScriptedRun {
    /// Exit 0 with `stdout`.
    pub fn success(stdout: &str) -> Self {
        Self {
            result: AgentInvocationResult {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
                success: true,
                timed_out: false,
            },
            files: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            result: AgentInvocationResult {
                exit_code: Some(exit_code),
                ..AgentInvocationResult::failure(stderr)
            },
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files.push((name.to_string(), contents.to_string()));
        self
    }
}

/// Invoker that replays scripted runs in order without spawning processes.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedInvoker {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: &InvocationRequest) -> AgentInvocationResult {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let Some(run) = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        else {
            return AgentInvocationResult::failure("no scripted run left");
        };
        let dir = request
            .workdir
            .clone()
            .or_else(|| request.instructions_path.parent().map(|p| p.to_path_buf()));
        if let Some(dir) = dir {
            for (name, contents) in &run.files {
                if let Err(err) = fs::write(dir.join(name), contents) {
                    return AgentInvocationResult::failure(format!("scripted write failed: {err}"));
                }
            }
        }
        run.result
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Lookup source returning a fixed table, optionally slowly, counting fetches.
#[derive(Debug, Default)]
pub struct StaticLookupSource {
    table: LookupTable,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StaticLookupSource {
    pub fn new(states: &[(&str, &str)]) -> Self {
        Self {
            table: lookup_table(states),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl LookupSource for StaticLookupSource {
    fn fetch_lookup(&self) -> Result<LookupTable> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(self.table.clone())
    }
}
