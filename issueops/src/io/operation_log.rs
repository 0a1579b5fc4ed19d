//! Product logs kept in the working folder.
//!
//! - `issue-operation-log.md`: append-only, one `##` section per event.
//! - `operation-report.json`: cumulative attempt history. Updates merge into
//!   the existing document so keys written by other tools survive.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::io::fs_atomic::write_atomic;

pub const OPERATION_LOG: &str = "issue-operation-log.md";
pub const OPERATION_REPORT: &str = "operation-report.json";

const LOG_TITLE: &str = "# Issue Operation Log";
const PUBLISHED_COMMENTS_KEY: &str = "publishedComments";

/// Identity fields stamped on `operation-report.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationIdentity {
    pub work_item_id: String,
    pub operation: String,
    pub working_folder: String,
}

/// One entry of the `attempts` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub event: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_assets: Option<Value>,
}

impl AttemptRecord {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            timestamp: now_rfc3339(),
            ..Self::default()
        }
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Append one event section, writing the title first if the log is new.
pub fn append_log_entry(dir: &Path, event: &str, details: &[(&str, String)]) -> Result<()> {
    let path = dir.join(OPERATION_LOG);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    let is_new = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len()
        == 0;

    let mut entry = String::new();
    if is_new {
        entry.push_str(LOG_TITLE);
        entry.push_str("\n\n");
    }
    entry.push_str(&format!("## {} {event}\n\n", now_rfc3339()));
    for (key, value) in details {
        entry.push_str(&format!("- **{key}**: {value}\n"));
    }
    entry.push('\n');

    file.write_all(entry.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Append `attempt` to `operation-report.json`, preserving unknown keys.
pub fn record_attempt(dir: &Path, identity: &OperationIdentity, attempt: &AttemptRecord) -> Result<()> {
    update_report(dir, identity, |doc| {
        let attempts = doc
            .entry("attempts")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(attempts) = attempts else {
            return Err(anyhow!("'attempts' is not an array"));
        };
        attempts.push(serde_json::to_value(attempt).context("serialize attempt")?);
        Ok(())
    })
}

/// Comment filenames already posted to the work item.
pub fn published_comments(dir: &Path) -> Result<BTreeSet<String>> {
    let Some(doc) = read_report(dir)? else {
        return Ok(BTreeSet::new());
    };
    Ok(doc
        .get(PUBLISHED_COMMENTS_KEY)
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

pub fn mark_comment_published(dir: &Path, identity: &OperationIdentity, filename: &str) -> Result<()> {
    update_report(dir, identity, |doc| {
        let names = doc
            .entry(PUBLISHED_COMMENTS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(names) = names else {
            return Err(anyhow!("'{PUBLISHED_COMMENTS_KEY}' is not an array"));
        };
        if !names.iter().any(|n| n.as_str() == Some(filename)) {
            names.push(Value::String(filename.to_string()));
        }
        Ok(())
    })
}

/// Parsed `operation-report.json`, or `None` if absent.
pub fn read_report(dir: &Path) -> Result<Option<Map<String, Value>>> {
    let path = dir.join(OPERATION_REPORT);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(anyhow!("{} is not a JSON object", path.display())),
    }
}

fn update_report(
    dir: &Path,
    identity: &OperationIdentity,
    apply: impl FnOnce(&mut Map<String, Value>) -> Result<()>,
) -> Result<()> {
    let path = dir.join(OPERATION_REPORT);
    let mut doc = read_report(dir)?.unwrap_or_default();
    doc.insert("workItemId".to_string(), json!(identity.work_item_id));
    doc.insert("operation".to_string(), json!(identity.operation));
    doc.insert("workingFolder".to_string(), json!(identity.working_folder));
    apply(&mut doc).with_context(|| format!("update {}", path.display()))?;
    doc.insert("lastUpdated".to_string(), json!(now_rfc3339()));

    let mut buf = serde_json::to_string_pretty(&Value::Object(doc))?;
    buf.push('\n');
    write_atomic(&path, buf.as_bytes())
}
