//! Heading-structure rules for operation instruction templates.
//!
//! An operation template is spliced under the general template, so it must
//! contribute exactly one section (`## ...`) and no document title (`# ...`).
//! Headings inside fenced code blocks are ignored.

/// A heading rule violation, with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingViolation {
    pub line: usize,
    pub reason: String,
}

/// Validate operation template headings.
pub fn validate_operation_headings(content: &str) -> Result<(), HeadingViolation> {
    let mut fence: Option<char> = None;
    let mut first_content_line: Option<usize> = None;
    let mut section_line: Option<usize> = None;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();

        if let Some(marker) = fence_marker(trimmed) {
            match fence {
                Some(open) if open == marker => fence = None,
                Some(_) => {}
                None => fence = Some(marker),
            }
            first_content_line.get_or_insert(line_no);
            continue;
        }
        if fence.is_some() {
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        let first = *first_content_line.get_or_insert(line_no);

        match heading_level(trimmed) {
            Some(1) => {
                return Err(HeadingViolation {
                    line: line_no,
                    reason: "top-level heading ('# ') is not allowed in an operation template"
                        .to_string(),
                });
            }
            Some(2) => {
                if let Some(prev) = section_line {
                    return Err(HeadingViolation {
                        line: line_no,
                        reason: format!(
                            "expected exactly one section heading ('## '), another was found at line {prev}"
                        ),
                    });
                }
                if line_no != first {
                    return Err(HeadingViolation {
                        line: line_no,
                        reason: format!(
                            "section heading must be the first non-blank line (content starts at line {first})"
                        ),
                    });
                }
                section_line = Some(line_no);
            }
            _ => {}
        }
    }

    if section_line.is_none() {
        return Err(HeadingViolation {
            line: first_content_line.unwrap_or(1),
            reason: "missing section heading ('## ') as the first non-blank line".to_string(),
        });
    }
    Ok(())
}

/// ATX heading level of a left-trimmed line, if it is a heading.
pub fn heading_level(trimmed: &str) -> Option<usize> {
    let hashes = trimmed.chars().take_while(|ch| *ch == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match trimmed[hashes..].chars().next() {
        None | Some(' ') | Some('\t') => Some(hashes),
        _ => None,
    }
}

/// Fence character (`` ` `` or `~`) if the line opens or closes a fenced block.
pub fn fence_marker(trimmed: &str) -> Option<char> {
    if trimmed.starts_with("```") {
        Some('`')
    } else if trimmed.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}
