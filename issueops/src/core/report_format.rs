//! On-disk layout of a report file.
//!
//! ```text
//! # Operation Report: <action>
//!
//! ```json
//! { ...status block... }
//! ```
//!
//! ## Payload
//!
//! <free text, or "None.">
//! ```

use anyhow::{Result, anyhow};

use crate::core::headings::{fence_marker, heading_level};
use crate::core::output_parser::{leading_fenced_block, parse_status_block};
use crate::core::types::{ReportRecord, StatusBlock};

const PAYLOAD_HEADING: &str = "## Payload";
const EMPTY_PAYLOAD: &str = "None.";

pub fn render_record(record: &ReportRecord) -> String {
    render_report(&record.to_block(), record.payload.as_deref())
}

pub fn render_report(block: &StatusBlock, payload: Option<&str>) -> String {
    let action = block.action.as_deref().unwrap_or("result");
    // Serializing a struct of optional strings cannot fail.
    let json = serde_json::to_string_pretty(block).unwrap_or_else(|_| "{}".to_string());
    let payload = payload
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(EMPTY_PAYLOAD);
    format!("# Operation Report: {action}\n\n```json\n{json}\n```\n\n{PAYLOAD_HEADING}\n\n{payload}\n")
}

/// Split a report file into its status block and payload.
///
/// The block is the first fenced block in the file, whether or not it sits
/// directly under the title; agent-written reports vary in their preamble.
pub fn parse_report(content: &str) -> Result<(StatusBlock, Option<String>)> {
    let start = first_fence_offset(content).ok_or_else(|| anyhow!("no fenced status block"))?;
    let json = leading_fenced_block(&content[start..])
        .ok_or_else(|| anyhow!("unterminated fenced status block"))?;
    let block = parse_status_block(&json)?;
    Ok((block, payload_section(content)))
}

fn first_fence_offset(content: &str) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if fence_marker(line.trim_start()).is_some() {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn payload_section(content: &str) -> Option<String> {
    let mut fence: Option<char> = None;
    let mut payload: Option<String> = None;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            fence = match fence {
                Some(open) if open == marker => None,
                Some(open) => Some(open),
                None => Some(marker),
            };
        } else if fence.is_none()
            && payload.is_none()
            && heading_level(trimmed).is_some()
            && trimmed.trim_start_matches('#').trim().eq_ignore_ascii_case("payload")
        {
            payload = Some(String::new());
            continue;
        }
        if let Some(buf) = payload.as_mut() {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    payload
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != EMPTY_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ReportStatus;

    fn record(payload: Option<&str>) -> ReportRecord {
        ReportRecord {
            work_item_id: "X-1".to_string(),
            operation_name: "review".to_string(),
            action: "start".to_string(),
            working_folder: "/tmp/op".to_string(),
            status: ReportStatus::InProgress,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            summary: "starting".to_string(),
            payload: payload.map(str::to_string),
        }
    }

    #[test]
    fn rendered_record_reads_back() {
        let rendered = render_record(&record(Some("line one\n\n```sh\n## not payload end\n```")));
        assert!(rendered.starts_with("# Operation Report: start\n"));
        let (block, payload) = parse_report(&rendered).expect("parse");
        assert_eq!(block.report_status(), Some(ReportStatus::InProgress));
        assert_eq!(block.work_item_id.as_deref(), Some("X-1"));
        let payload = payload.expect("payload");
        assert!(payload.starts_with("line one"));
        assert!(payload.ends_with("```"));
    }

    #[test]
    fn empty_payload_renders_placeholder() {
        let rendered = render_record(&record(None));
        assert!(rendered.contains("## Payload\n\nNone.\n"));
        let (_, payload) = parse_report(&rendered).expect("parse");
        assert_eq!(payload, None);
    }

    #[test]
    fn rejects_file_without_block() {
        let err = parse_report("# Operation Report\n\nno block here\n").unwrap_err();
        assert!(err.to_string().contains("no fenced status block"));
    }
}
