//! Working-folder file contract.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::core::types::ParsedOutput;
use crate::io::fs_atomic::write_atomic;

pub const ORIGINAL_ISSUE: &str = "original-issue.md";
pub const REVISED_ISSUE: &str = "revised-issue.md";
pub const CONTEXT_DUMP: &str = "context-dump.md";
pub const PARSED_OUTPUT: &str = "parsed-output.json";
pub const AGENT_LOG: &str = "agent-output.log";
pub const INSTRUCTIONS: &str = "instructions.md";

static COMMENT_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^comment-(\d{3,})\.md$").expect("valid comment file regex"));

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub original_issue: PathBuf,
    pub revised_issue: PathBuf,
    pub context_dump: PathBuf,
    pub parsed_output: PathBuf,
    pub agent_log: PathBuf,
    pub instructions: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            original_issue: dir.join(ORIGINAL_ISSUE),
            revised_issue: dir.join(REVISED_ISSUE),
            context_dump: dir.join(CONTEXT_DUMP),
            parsed_output: dir.join(PARSED_OUTPUT),
            agent_log: dir.join(AGENT_LOG),
            instructions: dir.join(INSTRUCTIONS),
        }
    }
}

/// Files written from one parsed output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub revised_issue: Option<PathBuf>,
    pub comments: Vec<PathBuf>,
    pub context_dump: Option<PathBuf>,
    pub parsed_output: Option<PathBuf>,
}

pub fn write_original(paths: &ArtifactPaths, body: &str) -> Result<()> {
    write_text(&paths.original_issue, body)
}

/// Persist the pieces of `parsed` that exist.
///
/// An existing `revised-issue.md` (e.g. saved by the agent itself) is only
/// replaced when a revised body was parsed. Blocking questions become one
/// extra comment so they reach the work item.
pub fn write_parsed_artifacts(paths: &ArtifactPaths, parsed: &ParsedOutput) -> Result<WrittenArtifacts> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create working folder {}", paths.dir.display()))?;
    let mut written = WrittenArtifacts::default();

    if let Some(body) = &parsed.revised_body {
        write_atomic(&paths.revised_issue, body.as_bytes())?;
        written.revised_issue = Some(paths.revised_issue.clone());
    }

    let mut next = next_comment_number(&paths.dir)?;
    let questions = blocking_questions_comment(&parsed.blocking_questions);
    for comment in parsed.comments.iter().chain(questions.iter()) {
        let path = paths.dir.join(comment_filename(next));
        write_text(&path, comment)?;
        written.comments.push(path);
        next += 1;
    }

    if let Some(note) = &parsed.context_note {
        write_text(&paths.context_dump, note)?;
        written.context_dump = Some(paths.context_dump.clone());
    }

    write_json(&paths.parsed_output, parsed)?;
    written.parsed_output = Some(paths.parsed_output.clone());
    Ok(written)
}

pub fn comment_filename(number: u32) -> String {
    format!("comment-{number:03}.md")
}

/// `comment-NNN.md` files in numeric order.
pub fn comment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("list {}", dir.display())),
    };
    let mut numbered = Vec::new();
    for entry in read_dir {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        let name = entry.file_name();
        if let Some(number) = name.to_str().and_then(comment_number) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

/// File contents, or `None` if the file does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn comment_number(name: &str) -> Option<u32> {
    COMMENT_FILE_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn next_comment_number(dir: &Path) -> Result<u32> {
    let max = comment_files(dir)?
        .iter()
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).and_then(comment_number))
        .max();
    Ok(max.map_or(1, |n| n.saturating_add(1)))
}

fn blocking_questions_comment(questions: &[String]) -> Option<String> {
    if questions.is_empty() {
        return None;
    }
    let mut text = String::from("Blocking questions:\n\n");
    for question in questions {
        text.push_str("- ");
        text.push_str(question);
        text.push('\n');
    }
    Some(text)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::OutcomeStatus;

    fn parsed() -> ParsedOutput {
        ParsedOutput {
            status: OutcomeStatus::Blocked,
            revised_body: Some("new body".to_string()),
            comments: vec!["first".to_string(), "second".to_string()],
            blocking_questions: vec!["Which API?".to_string()],
            embedded_report: None,
            context_note: Some("ctx".to_string()),
        }
    }

    #[test]
    fn writes_every_parsed_piece() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        let written = write_parsed_artifacts(&paths, &parsed()).expect("write");
        assert_eq!(written.comments.len(), 3);
        assert_eq!(
            fs::read_to_string(&paths.revised_issue).expect("revised"),
            "new body"
        );
        let questions = fs::read_to_string(temp.path().join("comment-003.md")).expect("questions");
        assert!(questions.contains("- Which API?"));
        assert_eq!(fs::read_to_string(&paths.context_dump).expect("ctx"), "ctx");
        let json = fs::read_to_string(&paths.parsed_output).expect("json");
        assert!(json.contains("\"status\": \"Blocked\""));
        assert!(json.contains("\"blockingQuestions\""));
    }

    /// A second pass continues numbering instead of overwriting earlier comments.
    #[test]
    fn comment_numbers_continue_after_existing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        write_parsed_artifacts(&paths, &parsed()).expect("first");
        let second = ParsedOutput {
            revised_body: None,
            blocking_questions: Vec::new(),
            context_note: None,
            comments: vec!["third".to_string()],
            ..parsed()
        };
        let written = write_parsed_artifacts(&paths, &second).expect("second");
        assert_eq!(written.comments, vec![temp.path().join("comment-004.md")]);
        assert_eq!(written.revised_issue, None);
        assert_eq!(comment_files(temp.path()).expect("list").len(), 4);
        assert_eq!(
            fs::read_to_string(&paths.revised_issue).expect("revised"),
            "new body"
        );
    }

    #[test]
    fn read_optional_distinguishes_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        assert_eq!(read_optional(&paths.original_issue).expect("read"), None);
        write_original(&paths, "body").expect("write");
        assert_eq!(
            read_optional(&paths.original_issue).expect("read"),
            Some(b"body".to_vec())
        );
    }
}
