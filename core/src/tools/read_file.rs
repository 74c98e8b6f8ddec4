//! File reading in two modes: a plain line slice, or an indentation block
//! that follows a code structure from an anchor line.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::boundary::FsBoundary;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::models::ToolResult;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;

/// Lines longer than this are cut (at a char boundary) with an ellipsis.
const MAX_LINE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ReadMode {
    Slice,
    Indentation,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadFileArgs {
    pub path: String,
    /// 0-based line to start from.
    pub offset: usize,
    pub limit: usize,
    pub mode: ReadMode,
    /// Indentation mode only: explicit anchor prefix. When null or empty the
    /// anchor is the indentation of the line at `offset`.
    pub indent: Option<String>,
}

pub(crate) fn spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "path".to_string(),
        JsonSchema::string("File to read, absolute or relative to the workspace root"),
    );
    properties.insert(
        "offset".to_string(),
        JsonSchema::number("0-based line number to start reading from"),
    );
    properties.insert(
        "limit".to_string(),
        JsonSchema::number("Maximum number of lines to return"),
    );
    properties.insert(
        "mode".to_string(),
        JsonSchema::string(
            "Either 'slice' (return the requested line range) or 'indentation' (return the \
             block of lines at or below the anchor line's indentation)",
        ),
    );
    properties.insert(
        "indent".to_string(),
        JsonSchema::string(
            "Indentation mode only: explicit anchor prefix; null derives it from the line at \
             offset",
        ),
    );
    ToolSpec::function(
        "read_file",
        "Reads a file as text, either a line slice or an indentation-delimited block",
        properties,
        &["path", "offset", "limit", "mode", "indent"],
    )
}

pub(crate) fn run(args: ReadFileArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    if args.limit == 0 {
        return Err(LinconaErr::InvalidArguments(
            "field `limit` must be at least 1".to_string(),
        ));
    }
    let path = boundary.resolve(Path::new(&args.path))?;
    let contents = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.lines().collect();
    if args.offset >= lines.len() {
        return Err(LinconaErr::InvalidArguments(format!(
            "field `offset`: {} is past the end of the file ({} lines)",
            args.offset,
            lines.len()
        )));
    }

    let selected: Vec<&str> = match args.mode {
        ReadMode::Slice => lines
            .iter()
            .skip(args.offset)
            .take(args.limit)
            .copied()
            .collect(),
        ReadMode::Indentation => indentation_block(&lines, args.offset, args.limit, args.indent),
    };

    let mut clipped = false;
    let text: String = selected
        .iter()
        .map(|line| {
            let (capped, cut) = cap_line(line);
            if cut {
                clipped = true;
            }
            format!("{capped}\n")
        })
        .collect();
    Ok(ToolResult::ok(text).truncated(clipped))
}

/// Starting at `offset`, keep lines while they are blank or at least as
/// indented as the anchor. Blank lines only survive when the block continues
/// below them.
fn indentation_block<'a>(
    lines: &[&'a str],
    offset: usize,
    limit: usize,
    indent: Option<String>,
) -> Vec<&'a str> {
    let anchor = match indent.as_deref() {
        Some(prefix) if !prefix.is_empty() => indent_width(prefix),
        _ => indent_width(lines[offset]),
    };

    let mut block: Vec<&str> = Vec::new();
    let mut pending_blanks: Vec<&str> = Vec::new();
    for line in lines.iter().skip(offset) {
        if block.len() + pending_blanks.len() >= limit {
            break;
        }
        if line.trim().is_empty() {
            if block.is_empty() {
                break;
            }
            pending_blanks.push(line);
            continue;
        }
        if !block.is_empty() && indent_width(line) < anchor {
            break;
        }
        block.append(&mut pending_blanks);
        block.push(line);
    }
    block.truncate(limit);
    block
}

/// Width of a line's leading whitespace, tabs counted as one column each.
fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn cap_line(line: &str) -> (String, bool) {
    if line.chars().count() <= MAX_LINE_CHARS {
        return (line.to_string(), false);
    }
    let capped: String = line.chars().take(MAX_LINE_CHARS).collect();
    (format!("{capped}…"), true)
}
