//! Tracking-service collaborator interface.
//!
//! The orchestrator only talks to the tracker through these traits. A real
//! client lives outside this crate; [`OfflineTracker`] stands in when no
//! credential is configured.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tracing::debug;

/// Workflow-state name to identifier table, as fetched from the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTable {
    pub name_to_id: BTreeMap<String, String>,
    /// Teams/projects the table was assembled from.
    pub source_groups: Vec<String>,
}

/// A status transition target. `id` is `None` when the lookup could not resolve the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    pub name: String,
    pub id: Option<String>,
}

/// Source of the lookup table cached by [`crate::io::lookup_cache::LookupCache`].
pub trait LookupSource {
    fn fetch_lookup(&self) -> Result<LookupTable>;
}

/// Work-item operations used by the pre-sync gate and the publish step.
///
/// Implementations return `Ok(false)` / `Ok(None)` when a call was skipped
/// (e.g. missing credential); `Err` is reserved for failed remote calls.
pub trait Tracker: LookupSource {
    /// Current status name of the work item.
    fn get_status(&self, work_item_id: &str) -> Result<Option<String>>;

    fn get_body(&self, work_item_id: &str) -> Result<Option<String>>;

    fn update_status(&self, work_item_id: &str, state: &WorkflowState) -> Result<bool>;

    fn add_comment(&self, work_item_id: &str, text: &str) -> Result<bool>;

    fn update_body(&self, work_item_id: &str, text: &str) -> Result<bool>;

    fn check_connection(&self) -> bool;
}

/// Tracker used without a credential: every call is a benign no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTracker;

impl LookupSource for OfflineTracker {
    fn fetch_lookup(&self) -> Result<LookupTable> {
        Err(anyhow!("no tracker credential configured"))
    }
}

impl Tracker for OfflineTracker {
    fn get_status(&self, work_item_id: &str) -> Result<Option<String>> {
        debug!(work_item_id, "offline tracker: status unavailable");
        Ok(None)
    }

    fn get_body(&self, work_item_id: &str) -> Result<Option<String>> {
        debug!(work_item_id, "offline tracker: body unavailable");
        Ok(None)
    }

    fn update_status(&self, work_item_id: &str, state: &WorkflowState) -> Result<bool> {
        debug!(work_item_id, status = %state.name, "offline tracker: skipping status update");
        Ok(false)
    }

    fn add_comment(&self, work_item_id: &str, _text: &str) -> Result<bool> {
        debug!(work_item_id, "offline tracker: skipping comment");
        Ok(false)
    }

    fn update_body(&self, work_item_id: &str, _text: &str) -> Result<bool> {
        debug!(work_item_id, "offline tracker: skipping body update");
        Ok(false)
    }

    fn check_connection(&self) -> bool {
        false
    }
}
