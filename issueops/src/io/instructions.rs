//! Instruction assembly: general template + operation template, with
//! placeholder substitution and optional injected blocks.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::{debug, instrument};

use crate::core::headings::{fence_marker, heading_level, validate_operation_headings};
use crate::core::types::InstructionReplacements;

const SAVE_PROTOCOL_TEMPLATE: &str = include_str!("prompts/save_protocol.md");
const SIMULATE_FAILURE_TEMPLATE: &str = include_str!("prompts/simulate_failure.md");

/// Heading of the general-template section the save-protocol block is placed in.
pub const SAVE_PROTOCOL_ANCHOR: &str = "Working Folder";

/// Work item id the agent is told to use in failure-simulation mode.
pub const SIMULATED_INVALID_ID: &str = "INVALID-99999";

pub const PLACEHOLDER_ISSUE_ID: &str = "<ArgIssueId>";
pub const PLACEHOLDER_OPERATION: &str = "<ArgOperation>";
pub const PLACEHOLDER_WORKING_FOLDER: &str = "<ArgWorkingFolder>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    pub save_protocol: bool,
    /// Test mode: instruct the agent to address an invalid work item.
    pub simulate_failure: bool,
}

/// Operation template heading structure is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFormatError {
    pub path: PathBuf,
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for TemplateFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid operation template {} (line {}): {}",
            self.path.display(),
            self.line,
            self.reason
        )
    }
}

impl std::error::Error for TemplateFormatError {}

struct BlockEngine {
    env: Environment<'static>,
}

impl BlockEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("save_protocol", SAVE_PROTOCOL_TEMPLATE)
            .expect("save protocol template should be valid");
        env.add_template("simulate_failure", SIMULATE_FAILURE_TEMPLATE)
            .expect("simulate failure template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, replacements: &InstructionReplacements) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            work_item_id => replacements.work_item_id.as_str(),
            operation => replacements.operation_name.as_str(),
            working_folder => replacements.working_folder.display().to_string(),
            invalid_id => SIMULATED_INVALID_ID,
        })?;
        Ok(rendered)
    }
}

/// Build the instructions file and return its content.
///
/// Fails with a "not found" error for a missing template and with a
/// [`TemplateFormatError`] when the operation template's headings are invalid.
#[instrument(skip_all, fields(operation = %replacements.operation_name, output = %output_path.display()))]
pub fn assemble_instructions(
    general_path: &Path,
    operation_path: &Path,
    replacements: &InstructionReplacements,
    output_path: &Path,
    options: &AssembleOptions,
) -> Result<String> {
    let general = read_template(general_path)?;
    let operation = read_template(operation_path)?;

    validate_operation_headings(&operation).map_err(|violation| TemplateFormatError {
        path: operation_path.to_path_buf(),
        line: violation.line,
        reason: violation.reason,
    })?;

    let engine = BlockEngine::new();
    let mut general = substitute_placeholders(&general, replacements);
    if options.save_protocol {
        let block = engine.render("save_protocol", replacements)?;
        general = insert_after_anchor(&general, SAVE_PROTOCOL_ANCHOR, &block);
    }

    let operation = substitute_placeholders(&operation, replacements);
    let mut combined = format!("{}\n\n{}\n", general.trim_end(), operation.trim());
    if options.simulate_failure {
        let block = engine.render("simulate_failure", replacements)?;
        combined = format!("{}\n\n{}\n", combined.trim_end(), block.trim());
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(output_path, &combined)
        .with_context(|| format!("write instructions {}", output_path.display()))?;
    debug!(bytes = combined.len(), "instructions written");
    Ok(combined)
}

/// Replace every placeholder occurrence literally.
pub fn substitute_placeholders(template: &str, replacements: &InstructionReplacements) -> String {
    template
        .replace(PLACEHOLDER_ISSUE_ID, &replacements.work_item_id)
        .replace(PLACEHOLDER_OPERATION, &replacements.operation_name)
        .replace(
            PLACEHOLDER_WORKING_FOLDER,
            &replacements.working_folder.display().to_string(),
        )
}

fn read_template(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(anyhow!(
            "instruction template not found: {}",
            path.display()
        )),
        Err(err) => Err(err).with_context(|| format!("read template {}", path.display())),
    }
}

/// Insert `block` at the end of the section headed `anchor`; append if there is no such section.
///
/// The section ends at the next heading of the same or higher level outside a fence.
fn insert_after_anchor(document: &str, anchor: &str, block: &str) -> String {
    let mut fence: Option<char> = None;
    let mut anchor_level: Option<usize> = None;
    let mut insert_at: Option<usize> = None;
    let mut offset = 0usize;

    for line in document.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            fence = match fence {
                Some(open) if open == marker => None,
                Some(open) => Some(open),
                None => Some(marker),
            };
        } else if fence.is_none()
            && let Some(level) = heading_level(trimmed)
        {
            match anchor_level {
                Some(anchor_level) if level <= anchor_level => {
                    insert_at = Some(offset);
                    break;
                }
                None if trimmed.trim_start_matches('#').trim().eq_ignore_ascii_case(anchor) => {
                    anchor_level = Some(level);
                }
                _ => {}
            }
        }
        offset += line.len();
    }

    let block = block.trim();
    match insert_at {
        Some(at) => {
            let (head, tail) = document.split_at(at);
            format!("{}\n\n{block}\n\n{tail}", head.trim_end())
        }
        None => format!("{}\n\n{block}\n", document.trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERAL: &str = "# Instructions\n\nWork on <ArgIssueId> for <ArgOperation>.\n\n## Working Folder\n\nUse <ArgWorkingFolder>.\n\n### Files\n- notes\n\n## Output\n\nEmit sections.\n";
    const OPERATION: &str = "## Review\n\nReview <ArgIssueId> carefully.\n";

    fn replacements() -> InstructionReplacements {
        InstructionReplacements {
            work_item_id: "X-1".to_string(),
            operation_name: "Review".to_string(),
            working_folder: PathBuf::from("/tmp/op"),
        }
    }

    fn write_templates(dir: &Path, operation: &str) -> (PathBuf, PathBuf) {
        let general = dir.join("general.md");
        let op = dir.join("review.md");
        fs::write(&general, GENERAL).expect("write general");
        fs::write(&op, operation).expect("write operation");
        (general, op)
    }

    #[test]
    fn substitutes_every_placeholder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (general, op) = write_templates(temp.path(), OPERATION);
        let output = temp.path().join("out").join("instructions.md");
        let content = assemble_instructions(
            &general,
            &op,
            &replacements(),
            &output,
            &AssembleOptions::default(),
        )
        .expect("assemble");
        assert!(content.contains("X-1"));
        assert!(content.contains("Use /tmp/op."));
        assert!(!content.contains("<Arg"));
        assert!(content.find("# Instructions") < content.find("## Review"));
        assert_eq!(fs::read_to_string(&output).expect("read"), content);
    }

    #[test]
    fn missing_template_reports_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (general, _) = write_templates(temp.path(), OPERATION);
        let err = assemble_instructions(
            &general,
            &temp.path().join("absent.md"),
            &replacements(),
            &temp.path().join("out.md"),
            &AssembleOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn heading_violation_is_a_typed_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (general, op) = write_templates(temp.path(), "## Review\n\n# Title\n");
        let output = temp.path().join("out.md");
        let err = assemble_instructions(
            &general,
            &op,
            &replacements(),
            &output,
            &AssembleOptions::default(),
        )
        .unwrap_err();
        let format = err
            .downcast_ref::<TemplateFormatError>()
            .expect("template format error");
        assert_eq!(format.line, 3);
        assert_eq!(format.path, op);
        assert!(!output.exists());
    }

    #[test]
    fn save_protocol_lands_at_end_of_anchor_section() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (general, op) = write_templates(temp.path(), OPERATION);
        let options = AssembleOptions {
            save_protocol: true,
            simulate_failure: false,
        };
        let content = assemble_instructions(
            &general,
            &op,
            &replacements(),
            &temp.path().join("out.md"),
            &options,
        )
        .expect("assemble");
        let block = content.find("### Save Protocol").expect("block");
        assert!(content.find("### Files").expect("files") < block);
        assert!(block < content.find("## Output").expect("output"));
        assert!(content.contains("`/tmp/op/revised-issue.md`"));
        assert!(!content.contains(SIMULATED_INVALID_ID));
    }

    /// The filename the block asks the agent to use must be one the report store reads.
    #[test]
    fn save_protocol_names_sequenced_reports() {
        let engine = BlockEngine::new();
        let block = engine
            .render("save_protocol", &replacements())
            .expect("render");
        assert!(block.contains("`report-<action>-<N>.md`"));
        let example = block
            .split('`')
            .find(|part| part.starts_with("report-progress"))
            .expect("example filename");
        assert!(crate::core::report_naming::parse_report_filename(example).is_some());
    }

    #[test]
    fn save_protocol_appends_without_anchor() {
        let doc = "# Title\n\nBody\n";
        let out = insert_after_anchor(doc, SAVE_PROTOCOL_ANCHOR, "### Block\n");
        assert_eq!(out, "# Title\n\nBody\n\n### Block\n");
    }

    #[test]
    fn failure_simulation_only_when_requested() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (general, op) = write_templates(temp.path(), OPERATION);
        let options = AssembleOptions {
            save_protocol: false,
            simulate_failure: true,
        };
        let content = assemble_instructions(
            &general,
            &op,
            &replacements(),
            &temp.path().join("out.md"),
            &options,
        )
        .expect("assemble");
        assert!(content.contains(SIMULATED_INVALID_ID));
        assert!(content.trim_end().ends_with("quotes the error you received."));
    }
}
