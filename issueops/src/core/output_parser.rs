//! Agent output grammar.
//!
//! Agent stdout is free text with a handful of recognized section headings.
//! Parsing runs in two passes over the same section scan:
//!
//! - **Strict**: the fenced JSON block directly under an `Operation Report`
//!   heading must parse and match `schemas/status_block.schema.json`. A
//!   malformed block is logged and ignored.
//! - **Lenient**: prose sections (revised issue, comments, blocking questions,
//!   context dump, completion checklist) are captured line by line.
//!
//! Status priority is fixed: structured block, then blocking questions, then
//! revised body or comments, then the completion checklist. Anything else is
//! `Failed`.
//!
//! A section runs until the next recognized heading (or report anchor), not
//! until any heading, so revised issue bodies may contain their own `##`
//! structure. Headings inside fenced code blocks are never section boundaries.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::headings::{fence_marker, heading_level};
use crate::core::report_format::render_report;
use crate::core::report_naming::sanitize_action;
use crate::core::types::{
    ExtractedReport, OutcomeStatus, ParsedOutput, ReportStatus, StatusBlock,
};

const STATUS_BLOCK_SCHEMA: &str = include_str!("../../schemas/status_block.schema.json");

/// Raw output longer than this is kept as the revised body when nothing else matched.
pub const MIN_FALLBACK_BODY_BYTES: usize = 200;

static STATUS_BLOCK_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(STATUS_BLOCK_SCHEMA).expect("status block schema should be json");
    jsonschema::validator_for(&schema).expect("status block schema should compile")
});

static REPORT_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:file:\s*)?(report-[a-z0-9_.-]+\.md)$").expect("valid anchor regex")
});

static COMMENT_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^comment(?:\s*#?\d+)?(?:\s*[:\-].*)?$").expect("valid comment regex")
});

static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s*)?(.+?)\s*$").expect("valid list regex")
});

static CHECKLIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\[([ xX!~-])\]\s*(.*)$").expect("valid checklist regex")
});

/// Recognized section headings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    OperationReport,
    RevisedBody,
    Comment,
    BlockingQuestions,
    ContextDump,
    Checklist,
    ReportFile,
}

#[derive(Debug, Clone)]
struct Section {
    marker: Marker,
    title: String,
    body: String,
}

/// Parse raw agent stdout into a [`ParsedOutput`]. Never fails.
pub fn parse(raw: &str) -> ParsedOutput {
    let sections = scan_sections(raw, |_| true);

    let embedded_report = last_status_block(&sections);

    let mut revised_body = sections
        .iter()
        .rev()
        .filter(|s| s.marker == Marker::RevisedBody)
        .map(|s| s.body.trim())
        .find(|body| !body.is_empty())
        .map(str::to_string);

    let comments: Vec<String> = sections
        .iter()
        .filter(|s| s.marker == Marker::Comment)
        .map(|s| s.body.trim())
        .filter(|body| !body.is_empty())
        .map(str::to_string)
        .collect();

    let blocking_questions: Vec<String> = sections
        .iter()
        .filter(|s| s.marker == Marker::BlockingQuestions)
        .flat_map(|s| list_items(&s.body))
        .collect();

    let context_note = sections
        .iter()
        .filter(|s| s.marker == Marker::ContextDump)
        .map(|s| s.body.trim_matches(|ch| ch == '\n' || ch == '\r'))
        .find(|body| !body.trim().is_empty())
        .map(str::to_string);

    let structured = embedded_report
        .as_ref()
        .and_then(StatusBlock::report_status)
        .and_then(|status| match status {
            ReportStatus::Complete => Some(OutcomeStatus::Completed),
            ReportStatus::Blocked => Some(OutcomeStatus::Blocked),
            ReportStatus::Failed => Some(OutcomeStatus::Failed),
            ReportStatus::InProgress => None,
        });

    let status = if let Some(status) = structured {
        status
    } else if !blocking_questions.is_empty() {
        OutcomeStatus::Blocked
    } else if revised_body.is_some() || !comments.is_empty() {
        OutcomeStatus::Completed
    } else if let Some(status) = checklist_status(&sections) {
        revised_body = Some(raw.to_string());
        status
    } else {
        OutcomeStatus::Failed
    };

    if revised_body.is_none() && raw.trim().len() > MIN_FALLBACK_BODY_BYTES {
        debug!(bytes = raw.len(), "no section matched, keeping raw output as revised body");
        revised_body = Some(raw.trim().to_string());
    }

    ParsedOutput {
        status,
        revised_body,
        comments,
        blocking_questions,
        embedded_report,
        context_note,
    }
}

/// Locate report blocks anchored by a `report-*.md` heading.
///
/// Each block runs until the next anchor or recognized section heading;
/// `Operation Report` headings belong to the block. When no anchor exists
/// but the output carried a structured block, one record is synthesized
/// from it.
pub fn extract_report_records(raw: &str, parsed: &ParsedOutput) -> Vec<ExtractedReport> {
    let mut reports: Vec<ExtractedReport> = scan_sections(raw, |m| m != Marker::OperationReport)
        .into_iter()
        .filter(|s| s.marker == Marker::ReportFile)
        .filter_map(|s| {
            let content = s.body.trim();
            if content.is_empty() {
                return None;
            }
            let filename = REPORT_ANCHOR_RE
                .captures(&s.title)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_lowercase())?;
            Some(ExtractedReport {
                filename,
                content: format!("{content}\n"),
            })
        })
        .collect();

    if reports.is_empty()
        && let Some(block) = &parsed.embedded_report
    {
        let action = block.action.as_deref().unwrap_or("result");
        reports.push(ExtractedReport {
            filename: format!("report-{}.md", sanitize_action(action)),
            content: render_report(block, None),
        });
    }
    reports
}

/// Parse a fenced JSON status block and check it against the schema.
pub(crate) fn parse_status_block(json: &str) -> Result<StatusBlock> {
    let value: Value = serde_json::from_str(json).context("parse status block json")?;
    let messages: Vec<String> = STATUS_BLOCK_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "status block schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value).context("deserialize status block")
}

/// Contents of the first fenced block in `body`, if the first non-blank line opens one.
pub(crate) fn leading_fenced_block(body: &str) -> Option<String> {
    let mut lines = body.lines().skip_while(|line| line.trim().is_empty());
    let opener = fence_marker(lines.next()?.trim_start())?;
    let mut content = String::new();
    for line in lines {
        if fence_marker(line.trim_start()) == Some(opener) {
            return Some(content);
        }
        content.push_str(line);
        content.push('\n');
    }
    None
}

fn last_status_block(sections: &[Section]) -> Option<StatusBlock> {
    let section = sections
        .iter()
        .rev()
        .find(|s| s.marker == Marker::OperationReport)?;
    let Some(json) = leading_fenced_block(&section.body) else {
        warn!(heading = %section.title, "operation report heading without a fenced block");
        return None;
    };
    match parse_status_block(&json) {
        Ok(block) => Some(block),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "ignoring malformed status block");
            None
        }
    }
}

fn scan_sections(raw: &str, opens: impl Fn(Marker) -> bool) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut fence: Option<char> = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            fence = match fence {
                Some(open) if open == marker => None,
                Some(open) => Some(open),
                None => Some(marker),
            };
        } else if fence.is_none()
            && let Some((marker, title)) = classify_heading(trimmed)
            && opens(marker)
        {
            sections.push(Section {
                marker,
                title,
                body: String::new(),
            });
            continue;
        }

        if let Some(current) = sections.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }

    sections
}

fn classify_heading(trimmed: &str) -> Option<(Marker, String)> {
    let level = heading_level(trimmed)?;
    if level > 4 {
        return None;
    }
    let title = trimmed
        .trim_start_matches('#')
        .trim()
        .trim_end_matches('#')
        .trim()
        .trim_matches(|ch| ch == '*' || ch == '`' || ch == ':')
        .trim()
        .replace('`', "");

    if REPORT_ANCHOR_RE.is_match(&title) {
        return Some((Marker::ReportFile, title));
    }

    let lower = title.to_lowercase();
    let marker = match lower.as_str() {
        "operation report" | "issue operation report" => Marker::OperationReport,
        "revised issue" | "revised issue body" | "revised body" | "revised description" => {
            Marker::RevisedBody
        }
        "blocking questions" => Marker::BlockingQuestions,
        "context dump" | "agent context" => Marker::ContextDump,
        "completion checklist" | "operation checklist" => Marker::Checklist,
        other if COMMENT_TITLE_RE.is_match(other) => Marker::Comment,
        _ => return None,
    };
    Some((marker, title))
}

fn list_items(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| LIST_ITEM_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Completed only if every item is checked; Blocked if any item is blocked.
fn checklist_status(sections: &[Section]) -> Option<OutcomeStatus> {
    let mut total = 0usize;
    let mut done = 0usize;
    let mut blocked = false;

    for section in sections.iter().filter(|s| s.marker == Marker::Checklist) {
        for caps in section
            .body
            .lines()
            .filter_map(|line| CHECKLIST_ITEM_RE.captures(line))
        {
            total += 1;
            let mark = caps.get(1).map_or("", |m| m.as_str());
            let text = caps.get(2).map_or("", |m| m.as_str());
            if mark == "!" || text.contains("BLOCKED") {
                blocked = true;
            } else if mark.eq_ignore_ascii_case("x") {
                done += 1;
            }
        }
    }

    if blocked {
        Some(OutcomeStatus::Blocked)
    } else if total > 0 && done == total {
        Some(OutcomeStatus::Completed)
    } else {
        None
    }
}
