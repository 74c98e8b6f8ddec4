//! Parser for the freeform patch envelope.
//!
//! The grammar, informally:
//!
//! ```text
//! patch: "*** Begin Patch" LF operation+ "*** End Patch" LF?
//! operation: add_file | delete_file | update_file
//! add_file: "*** Add File: " path LF ("+" line LF)+
//! delete_file: "*** Delete File: " path LF
//! update_file: "*** Update File: " path LF chunk+
//! chunk: ("@@" | "@@ " context) LF (("+" | "-" | " ") line LF)+ eof_line?
//! eof_line: "*** End of File" LF
//! ```
//!
//! The parser is lenient about surrounding whitespace on marker lines but is
//! otherwise strict: every body line of an update chunk must carry a `+`, `-`
//! or space prefix.

use std::path::PathBuf;

use thiserror::Error;

use crate::PatchChange;
use crate::UpdateChunk;

const BEGIN_MARKER: &str = "*** Begin Patch";
const END_MARKER: &str = "*** End Patch";
const ADD_FILE_MARKER: &str = "*** Add File: ";
const DELETE_FILE_MARKER: &str = "*** Delete File: ";
const UPDATE_FILE_MARKER: &str = "*** Update File: ";
const EOF_MARKER: &str = "*** End of File";
const CONTEXT_MARKER: &str = "@@ ";
const EMPTY_CONTEXT_MARKER: &str = "@@";

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("invalid patch operation at line {line_number}: {message}")]
    InvalidOperation { message: String, line_number: usize },
}

use ParseError::*;

/// Parse a freeform envelope into an ordered list of file changes.
pub fn parse_freeform(patch: &str) -> Result<Vec<PatchChange>, ParseError> {
    let lines: Vec<&str> = patch.trim().lines().collect();
    if lines.first().map(|l| l.trim()) != Some(BEGIN_MARKER) {
        return Err(InvalidPatch(format!(
            "the first line of the patch must be '{BEGIN_MARKER}'"
        )));
    }
    if lines.last().map(|l| l.trim()) != Some(END_MARKER) {
        return Err(InvalidPatch(format!(
            "the last line of the patch must be '{END_MARKER}'"
        )));
    }

    let body = &lines[1..lines.len() - 1];
    let mut changes = Vec::new();
    let mut cursor = 0;
    while cursor < body.len() {
        // Patch line numbers are 1-based and account for the Begin marker.
        let line_number = cursor + 2;
        let (change, consumed) = parse_operation(&body[cursor..], line_number)?;
        changes.push(change);
        cursor += consumed;
    }
    Ok(changes)
}

/// Parse a single file operation from the start of `lines`. Returns the change
/// and the number of lines consumed.
fn parse_operation(lines: &[&str], line_number: usize) -> Result<(PatchChange, usize), ParseError> {
    let header = lines[0].trim();
    if let Some(path) = header.strip_prefix(ADD_FILE_MARKER) {
        let mut content = String::new();
        let mut consumed = 1;
        for line in &lines[1..] {
            let Some(added) = line.strip_prefix('+') else {
                break;
            };
            content.push_str(added);
            content.push('\n');
            consumed += 1;
        }
        if consumed == 1 {
            return Err(InvalidOperation {
                message: format!("added file '{path}' has no '+' content lines"),
                line_number,
            });
        }
        let change = PatchChange::Add {
            path: PathBuf::from(path),
            content,
        };
        return Ok((change, consumed));
    }

    if let Some(path) = header.strip_prefix(DELETE_FILE_MARKER) {
        let change = PatchChange::Delete {
            path: PathBuf::from(path),
        };
        return Ok((change, 1));
    }

    if let Some(path) = header.strip_prefix(UPDATE_FILE_MARKER) {
        let mut chunks = Vec::new();
        let mut consumed = 1;
        while consumed < lines.len() {
            let line = lines[consumed];
            // Blank separator lines between chunks are tolerated.
            if line.trim().is_empty() {
                consumed += 1;
                continue;
            }
            // The next file operation ends this update body.
            if line.starts_with("***") {
                break;
            }
            let (chunk, chunk_lines) = parse_chunk(
                &lines[consumed..],
                line_number + consumed,
                chunks.is_empty(),
            )?;
            chunks.push(chunk);
            consumed += chunk_lines;
        }
        if chunks.is_empty() {
            return Err(InvalidOperation {
                message: format!("update for '{path}' contains no chunks"),
                line_number,
            });
        }
        let change = PatchChange::Update {
            path: PathBuf::from(path),
            chunks,
        };
        return Ok((change, consumed));
    }

    Err(InvalidOperation {
        message: format!(
            "'{header}' is not a valid operation header; expected \
             '*** Add File: <path>', '*** Update File: <path>' or '*** Delete File: <path>'"
        ),
        line_number,
    })
}

/// Parse one `@@` chunk of an update body. The first chunk of an update may
/// omit the `@@` marker and start directly with diff lines.
fn parse_chunk(
    lines: &[&str],
    line_number: usize,
    allow_missing_context: bool,
) -> Result<(UpdateChunk, usize), ParseError> {
    let (change_context, body_start) = if lines[0].trim() == EMPTY_CONTEXT_MARKER {
        (None, 1)
    } else if let Some(context) = lines[0].strip_prefix(CONTEXT_MARKER) {
        (Some(context.to_string()), 1)
    } else if allow_missing_context {
        (None, 0)
    } else {
        return Err(InvalidOperation {
            message: format!("expected an '@@' context marker, got: '{}'", lines[0]),
            line_number,
        });
    };

    let mut chunk = UpdateChunk {
        change_context,
        ..Default::default()
    };
    let mut body_lines = 0;
    for line in &lines[body_start..] {
        if line.trim_end() == EOF_MARKER {
            if body_lines == 0 {
                return Err(InvalidOperation {
                    message: "update chunk contains no lines".to_string(),
                    line_number: line_number + body_start,
                });
            }
            chunk.is_end_of_file = true;
            body_lines += 1;
            break;
        }
        match line.chars().next() {
            None => {
                // A fully blank line counts as an empty context line.
                chunk.old_lines.push(String::new());
                chunk.new_lines.push(String::new());
            }
            Some(' ') => {
                chunk.old_lines.push(line[1..].to_string());
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('+') => chunk.new_lines.push(line[1..].to_string()),
            Some('-') => chunk.old_lines.push(line[1..].to_string()),
            _ => {
                if body_lines == 0 {
                    return Err(InvalidOperation {
                        message: format!(
                            "unexpected line in update chunk: '{line}'; every line must start \
                             with ' ', '+' or '-'"
                        ),
                        line_number: line_number + body_start,
                    });
                }
                // Start of the next chunk.
                break;
            }
        }
        body_lines += 1;
    }

    if body_lines == 0 {
        return Err(InvalidOperation {
            message: "update chunk contains no lines".to_string(),
            line_number: line_number + body_start,
        });
    }
    Ok((chunk, body_start + body_lines))
}
