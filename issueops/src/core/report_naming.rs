//! Report filename scheme: `report-<action>-<suffix>.md`.
//!
//! The numeric suffix is the authoritative ordering key. It is either a
//! sequence number (1, 2, ...) or a 17-digit millisecond timestamp; both sort
//! numerically. Suffixes are never reused and gaps are tolerated.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static REPORT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^report-([a-z0-9][a-z0-9-]*?)-(\d{1,19})\.md$").expect("valid report name regex")
});

/// Parsed report filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportName {
    pub action: String,
    pub suffix: u64,
}

/// Lowercase the action and collapse anything outside `[a-z0-9]` into `-`.
pub fn sanitize_action(action: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in action.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "event".to_string()
    } else {
        out
    }
}

pub fn report_filename(action: &str, suffix: u64) -> String {
    format!("report-{}-{}.md", sanitize_action(action), suffix)
}

pub fn parse_report_filename(name: &str) -> Option<ReportName> {
    let caps = REPORT_NAME_RE.captures(name)?;
    let suffix = caps.get(2)?.as_str().parse().ok()?;
    Some(ReportName {
        action: caps.get(1)?.as_str().to_string(),
        suffix,
    })
}

/// Next sequence number: one past the largest suffix present (1 when empty).
pub fn next_sequence<'a, I>(names: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    max_suffix(names).map_or(1, |max| max.saturating_add(1))
}

/// Timestamp suffix for `now`, bumped past any existing suffix.
pub fn next_timestamp_suffix<'a, I>(names: I, now: DateTime<Utc>) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let stamp = now
        .format("%Y%m%d%H%M%S%3f")
        .to_string()
        .parse::<u64>()
        .unwrap_or(0);
    match max_suffix(names) {
        Some(max) if max >= stamp => max.saturating_add(1),
        _ => stamp,
    }
}

/// Action name recovered from an agent-suggested filename such as
/// `report-review-done.md` or `report-review-3.md`.
pub fn action_from_suggested(filename: &str) -> String {
    if let Some(parsed) = parse_report_filename(filename) {
        return parsed.action;
    }
    let stem = filename.strip_suffix(".md").unwrap_or(filename);
    let stem = stem.strip_prefix("report-").unwrap_or(stem);
    sanitize_action(stem)
}

fn max_suffix<'a, I>(names: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter_map(parse_report_filename)
        .map(|name| name.suffix)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitizes_actions() {
        assert_eq!(sanitize_action("Review Done!"), "review-done");
        assert_eq!(sanitize_action("  --Start--  "), "start");
        assert_eq!(sanitize_action("???"), "event");
    }

    #[test]
    fn parses_filenames_with_dashed_actions() {
        assert_eq!(
            parse_report_filename("report-review-done-12.md"),
            Some(ReportName {
                action: "review-done".to_string(),
                suffix: 12
            })
        );
        assert_eq!(parse_report_filename("report-start.md"), None);
        assert_eq!(
            parse_report_filename("report-start-9999999999999999999.md").map(|n| n.suffix),
            Some(9_999_999_999_999_999_999)
        );
        assert_eq!(parse_report_filename("report-start-99999999999999999999.md"), None);
        assert_eq!(parse_report_filename("comment-001.md"), None);
    }

    #[test]
    fn sequence_starts_at_one_and_skips_gaps() {
        assert_eq!(next_sequence(Vec::<&str>::new()), 1);
        let names = ["report-start-1.md", "report-result-7.md", "notes.md"];
        assert_eq!(next_sequence(names), 8);
    }

    #[test]
    fn timestamp_suffix_never_goes_backwards() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(next_timestamp_suffix(Vec::<&str>::new(), now), 20260102030405000);
        let names = ["report-start-20260102030405000.md"];
        assert_eq!(next_timestamp_suffix(names, now), 20260102030405001);
    }

    #[test]
    fn recovers_action_from_suggested_names() {
        assert_eq!(action_from_suggested("report-review-3.md"), "review");
        assert_eq!(action_from_suggested("report-final.md"), "final");
        assert_eq!(action_from_suggested("Summary Notes.md"), "summary-notes");
    }
}
