//! Report files in a working folder.
//!
//! Every lifecycle event is one `report-<action>-<suffix>.md` file. Files are
//! created exclusively and never rewritten. Order is derived from the numeric
//! suffix only; directory listing order and mtimes are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::core::report_format::{parse_report, render_record};
use crate::core::report_naming::{
    ReportName, action_from_suggested, next_sequence, next_timestamp_suffix, parse_report_filename,
    report_filename,
};
use crate::core::types::{ExtractedReport, RecordDefaults, ReportRecord, ReportStatus};
use crate::io::config::ReportNaming;

/// Attempts at claiming a fresh filename before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 32;

/// A report filename found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub filename: String,
    pub name: ReportName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub filename: String,
    pub record: ReportRecord,
}

/// Aggregate view over a folder's reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    /// Readable reports per status name.
    pub by_status: BTreeMap<String, usize>,
    /// Files that could not be parsed as reports.
    pub unreadable: Vec<String>,
    pub latest: Option<StoredReport>,
}

/// Sequencer for report files in one working folder.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
    naming: ReportNaming,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>, naming: ReportNaming) -> Self {
        Self {
            dir: dir.into(),
            naming,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate and persist `record`, returning the new filename.
    ///
    /// Invalid records fail with a [`crate::core::types::ReportFieldError`]
    /// and nothing is written.
    #[instrument(skip_all, fields(dir = %self.dir.display(), action = %record.action))]
    pub fn write(&self, record: &ReportRecord) -> Result<String> {
        record.validate()?;
        let content = render_record(record);
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create report dir {}", self.dir.display()))?;

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let names = self.list_names()?;
            let suffix = match self.naming {
                ReportNaming::Sequence => next_sequence(names.iter().map(String::as_str)),
                ReportNaming::Timestamp => {
                    next_timestamp_suffix(names.iter().map(String::as_str), Utc::now())
                }
            };
            let filename = report_filename(&record.action, suffix);
            let path = self.dir.join(&filename);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .with_context(|| format!("write report {}", path.display()))?;
                    debug!(filename = %filename, status = %record.status, "report written");
                    return Ok(filename);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(filename = %filename, "report name taken, retrying");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create report {}", path.display()));
                }
            }
        }
        Err(anyhow!(
            "could not claim a report filename in {} after {MAX_CLAIM_ATTEMPTS} attempts",
            self.dir.display()
        ))
    }

    /// Persist a report found in agent output under a sequenced name.
    ///
    /// The suggested filename only contributes the action. Returns `Ok(None)`
    /// (after a warning) when the block is unreadable or incomplete.
    pub fn write_extracted(
        &self,
        report: &ExtractedReport,
        defaults: &RecordDefaults,
    ) -> Result<Option<String>> {
        let (mut block, payload) = match parse_report(&report.content) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(filename = %report.filename, err = %format!("{err:#}"), "skipping unreadable extracted report");
                return Ok(None);
            }
        };
        if block.action.as_deref().is_none_or(|a| a.trim().is_empty()) {
            block.action = Some(action_from_suggested(&report.filename));
        }
        let record = match block.into_record(payload, defaults) {
            Ok(record) => record,
            Err(err) => {
                warn!(filename = %report.filename, err = %err, "skipping invalid extracted report");
                return Ok(None);
            }
        };
        self.write(&record).map(Some)
    }

    /// Report files sorted by suffix (then filename).
    pub fn list(&self) -> Result<Vec<ReportEntry>> {
        let mut entries: Vec<ReportEntry> = self
            .list_names()?
            .into_iter()
            .filter_map(|filename| {
                parse_report_filename(&filename).map(|name| ReportEntry { filename, name })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.name
                .suffix
                .cmp(&b.name.suffix)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(entries)
    }

    /// Every readable report in sequence order; unreadable files are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<StoredReport>> {
        let mut reports = Vec::new();
        for entry in self.list()? {
            match self.read(&entry.filename) {
                Ok(record) => reports.push(StoredReport {
                    filename: entry.filename,
                    record,
                }),
                Err(err) => {
                    warn!(filename = %entry.filename, err = %format!("{err:#}"), "skipping unreadable report");
                }
            }
        }
        Ok(reports)
    }

    /// Status of the highest-suffix report.
    ///
    /// `Ok(None)` when there are no reports; an error when the latest one
    /// cannot be read or carries no recognizable status.
    pub fn latest_status(&self) -> Result<Option<ReportStatus>> {
        let Some(latest) = self.list()?.pop() else {
            return Ok(None);
        };
        let path = self.dir.join(&latest.filename);
        let content =
            fs::read_to_string(&path).with_context(|| format!("read report {}", path.display()))?;
        let (block, _) =
            parse_report(&content).with_context(|| format!("parse report {}", path.display()))?;
        block
            .report_status()
            .map(Some)
            .ok_or_else(|| anyhow!("report {} has no recognizable status", latest.filename))
    }

    pub fn summary(&self) -> Result<ReportSummary> {
        let mut summary = ReportSummary::default();
        for entry in self.list()? {
            summary.total += 1;
            match self.read(&entry.filename) {
                Ok(record) => {
                    *summary
                        .by_status
                        .entry(record.status.as_str().to_string())
                        .or_default() += 1;
                    summary.latest = Some(StoredReport {
                        filename: entry.filename,
                        record,
                    });
                }
                Err(_) => summary.unreadable.push(entry.filename),
            }
        }
        Ok(summary)
    }

    fn read(&self, filename: &str) -> Result<ReportRecord> {
        let path = self.dir.join(filename);
        let content =
            fs::read_to_string(&path).with_context(|| format!("read report {}", path.display()))?;
        let (block, payload) =
            parse_report(&content).with_context(|| format!("parse report {}", path.display()))?;
        let action = parse_report_filename(filename)
            .map(|name| name.action)
            .unwrap_or_default();
        let defaults = RecordDefaults {
            action,
            working_folder: self.dir.display().to_string(),
            ..RecordDefaults::default()
        };
        block
            .into_record(payload, &defaults)
            .with_context(|| format!("invalid report {}", path.display()))
    }

    fn list_names(&self) -> Result<Vec<String>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list {}", self.dir.display()));
            }
        };
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.with_context(|| format!("list {}", self.dir.display()))?;
            if let Some(name) = entry.file_name().to_str()
                && parse_report_filename(name).is_some()
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
