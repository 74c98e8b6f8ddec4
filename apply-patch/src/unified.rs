//! Parser for conventional unified diffs.
//!
//! Recognizes `--- a/<path>` / `+++ b/<path>` header pairs with `@@ -a,b +c,d @@`
//! hunks. A file addition is signalled by `--- /dev/null`, a deletion by
//! `+++ /dev/null`. Noise lines emitted by `git diff` (the `diff --git` and
//! `index` headers) are skipped.

use std::path::PathBuf;

use crate::PatchChange;
use crate::UpdateChunk;
use crate::parser::ParseError;

const DEV_NULL: &str = "/dev/null";
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Parse a unified diff into an ordered list of file changes.
pub fn parse_unified(patch: &str) -> Result<Vec<PatchChange>, ParseError> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut changes = Vec::new();
    let mut cursor = 0;

    while cursor < lines.len() {
        let line = lines[cursor];
        if line.starts_with("--- ") {
            let (change, consumed) = parse_file_section(&lines[cursor..], cursor + 1)?;
            changes.push(change);
            cursor += consumed;
        } else if line.trim().is_empty()
            || line.starts_with("diff ")
            || line.starts_with("index ")
            || line.starts_with("new file mode")
            || line.starts_with("deleted file mode")
        {
            cursor += 1;
        } else {
            return Err(ParseError::InvalidOperation {
                message: format!("unexpected line outside a file section: '{line}'"),
                line_number: cursor + 1,
            });
        }
    }

    if changes.is_empty() {
        return Err(ParseError::InvalidPatch(
            "unified diff contains no file headers".to_string(),
        ));
    }
    Ok(changes)
}

/// Parse one `---`/`+++` header pair and its hunks. Returns the change and the
/// number of lines consumed.
fn parse_file_section(
    lines: &[&str],
    line_number: usize,
) -> Result<(PatchChange, usize), ParseError> {
    let old_name = header_path(lines[0], "--- ");
    let Some(new_header) = lines.get(1) else {
        return Err(ParseError::InvalidOperation {
            message: "'---' header is not followed by a '+++' header".to_string(),
            line_number,
        });
    };
    if !new_header.starts_with("+++ ") {
        return Err(ParseError::InvalidOperation {
            message: format!("expected '+++' header, got: '{new_header}'"),
            line_number: line_number + 1,
        });
    }
    let new_name = header_path(new_header, "+++ ");

    let mut consumed = 2;
    let mut chunks: Vec<UpdateChunk> = Vec::new();
    while consumed < lines.len() && lines[consumed].starts_with("@@") {
        let (chunk, chunk_lines) = parse_hunk(&lines[consumed..], line_number + consumed)?;
        chunks.push(chunk);
        consumed += chunk_lines;
    }

    match (old_name, new_name) {
        (None, Some(path)) => {
            // --- /dev/null: the whole new file is carried in added lines.
            let mut content = String::new();
            for chunk in &chunks {
                if !chunk.old_lines.is_empty() {
                    return Err(ParseError::InvalidOperation {
                        message: format!("added file '{}' has removal lines", path.display()),
                        line_number,
                    });
                }
                for line in &chunk.new_lines {
                    content.push_str(line);
                    content.push('\n');
                }
            }
            if content.is_empty() {
                return Err(ParseError::InvalidOperation {
                    message: format!("added file '{}' has no content", path.display()),
                    line_number,
                });
            }
            Ok((PatchChange::Add { path, content }, consumed))
        }
        (Some(path), None) => Ok((PatchChange::Delete { path }, consumed)),
        (Some(path), Some(_)) => {
            if chunks.is_empty() {
                return Err(ParseError::InvalidOperation {
                    message: format!("update for '{}' contains no hunks", path.display()),
                    line_number,
                });
            }
            Ok((PatchChange::Update { path, chunks }, consumed))
        }
        (None, None) => Err(ParseError::InvalidOperation {
            message: "both sides of the file header are /dev/null".to_string(),
            line_number,
        }),
    }
}

/// Extract the path from a `---`/`+++` header line, stripping the
/// conventional `a/`/`b/` prefixes. `/dev/null` maps to `None`.
fn header_path(line: &str, prefix: &str) -> Option<PathBuf> {
    let raw = line[prefix.len()..].trim();
    // A `git diff` header may carry a trailing tab + timestamp.
    let raw = raw.split('\t').next().unwrap_or(raw);
    if raw == DEV_NULL {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(PathBuf::from(stripped))
}

/// Parse one `@@ -a,b +c,d @@` hunk. Returns the chunk and the number of lines
/// consumed (header included).
fn parse_hunk(lines: &[&str], line_number: usize) -> Result<(UpdateChunk, usize), ParseError> {
    parse_hunk_header(lines[0]).ok_or_else(|| ParseError::InvalidOperation {
        message: format!("malformed hunk header: '{}'", lines[0]),
        line_number,
    })?;

    let mut chunk = UpdateChunk::default();
    let mut consumed = 1;
    for line in &lines[1..] {
        match line.chars().next() {
            None => {
                // Some producers emit context lines for empty lines without
                // the leading space.
                chunk.old_lines.push(String::new());
                chunk.new_lines.push(String::new());
            }
            Some(' ') => {
                chunk.old_lines.push(line[1..].to_string());
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('-') if !line.starts_with("--- ") => {
                chunk.old_lines.push(line[1..].to_string());
            }
            Some('+') if !line.starts_with("+++ ") => {
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('\\') if line.trim_end() == NO_NEWLINE_MARKER => {
                chunk.is_end_of_file = true;
            }
            _ => break,
        }
        consumed += 1;
    }

    if chunk.old_lines.is_empty() && chunk.new_lines.is_empty() {
        return Err(ParseError::InvalidOperation {
            message: "hunk contains no lines".to_string(),
            line_number,
        });
    }
    Ok((chunk, consumed))
}

/// Parse the `-a,b +c,d` ranges out of a hunk header. The ranges are validated
/// but only their presence matters: hunks are located by exact context match,
/// not by line offset.
fn parse_hunk_header(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_range, rest) = rest.split_once(" +")?;
    let (new_range, _) = rest.split_once(" @@")?;
    let old_start = range_start(old_range)?;
    let new_start = range_start(new_range)?;
    Some((old_start, new_start))
}

fn range_start(range: &str) -> Option<u64> {
    let start = range.split(',').next()?;
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_update_hunks() {
        let diff = "--- a/src/main.rs\n\
                    +++ b/src/main.rs\n\
                    @@ -1,3 +1,3 @@\n \
                    fn main() {\n\
                    -    old();\n\
                    +    new();\n \
                    }\n";
        assert_eq!(
            parse_unified(diff),
            Ok(vec![PatchChange::Update {
                path: PathBuf::from("src/main.rs"),
                chunks: vec![UpdateChunk {
                    change_context: None,
                    old_lines: vec![
                        "fn main() {".to_string(),
                        "    old();".to_string(),
                        "}".to_string(),
                    ],
                    new_lines: vec![
                        "fn main() {".to_string(),
                        "    new();".to_string(),
                        "}".to_string(),
                    ],
                    is_end_of_file: false,
                }],
            }])
        );
    }

    #[test]
    fn dev_null_old_side_is_an_add() {
        let diff = "--- /dev/null\n\
                    +++ b/new.txt\n\
                    @@ -0,0 +1,2 @@\n\
                    +hello\n\
                    +world\n";
        assert_eq!(
            parse_unified(diff),
            Ok(vec![PatchChange::Add {
                path: PathBuf::from("new.txt"),
                content: "hello\nworld\n".to_string(),
            }])
        );
    }

    #[test]
    fn dev_null_new_side_is_a_delete() {
        let diff = "--- a/old.txt\n\
                    +++ /dev/null\n\
                    @@ -1,1 +0,0 @@\n\
                    -goodbye\n";
        assert_eq!(
            parse_unified(diff),
            Ok(vec![PatchChange::Delete {
                path: PathBuf::from("old.txt"),
            }])
        );
    }

    #[test]
    fn git_noise_lines_are_skipped() {
        let diff = "diff --git a/f.txt b/f.txt\n\
                    index e69de29..4b825dc 100644\n\
                    --- a/f.txt\n\
                    +++ b/f.txt\n\
                    @@ -1,1 +1,1 @@\n\
                    -a\n\
                    +b\n";
        let changes = parse_unified(diff).expect("diff should parse");
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn multiple_files_parse_in_order() {
        let diff = "--- a/one.txt\n\
                    +++ b/one.txt\n\
                    @@ -1,1 +1,1 @@\n\
                    -x\n\
                    +y\n\
                    --- a/two.txt\n\
                    +++ /dev/null\n\
                    @@ -1,1 +0,0 @@\n\
                    -z\n";
        let changes = parse_unified(diff).expect("diff should parse");
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[1], PatchChange::Delete { .. }));
    }

    #[test]
    fn malformed_hunk_header_is_rejected() {
        let diff = "--- a/f.txt\n\
                    +++ b/f.txt\n\
                    @@ nonsense @@\n\
                    -a\n\
                    +b\n";
        assert!(matches!(
            parse_unified(diff),
            Err(ParseError::InvalidOperation { line_number: 3, .. })
        ));
    }

    #[test]
    fn truncated_header_pair_is_rejected() {
        assert!(matches!(
            parse_unified("--- a/f.txt\n"),
            Err(ParseError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn no_newline_marker_anchors_eof() {
        let diff = "--- a/f.txt\n\
                    +++ b/f.txt\n\
                    @@ -1,1 +1,1 @@\n\
                    -end\n\
                    +end!\n\
                    \\ No newline at end of file\n";
        let changes = parse_unified(diff).expect("diff should parse");
        match &changes[0] {
            PatchChange::Update { chunks, .. } => assert!(chunks[0].is_end_of_file),
            other => panic!("expected update, got {other:?}"),
        }
    }
}
