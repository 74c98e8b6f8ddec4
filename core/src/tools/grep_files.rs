//! Recursive regex search with include-glob filtering.

use std::collections::BTreeMap;
use std::path::Path;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::boundary::FsBoundary;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::models::ToolResult;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;

#[derive(Debug, Deserialize)]
pub(crate) struct GrepFilesArgs {
    pub pattern: String,
    pub path: String,
    /// Glob whitelist; empty means every file.
    pub include: Vec<String>,
    /// Cap on total matching lines across all files.
    pub limit: usize,
}

#[derive(Debug, Serialize)]
struct FileMatches {
    file: String,
    matches: Vec<LineMatch>,
}

#[derive(Debug, Serialize)]
struct LineMatch {
    line_num: usize,
    line: String,
}

pub(crate) fn spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "pattern".to_string(),
        JsonSchema::string("Regular expression to search for"),
    );
    properties.insert(
        "path".to_string(),
        JsonSchema::string("Directory to search, absolute or relative to the workspace root"),
    );
    properties.insert(
        "include".to_string(),
        JsonSchema::string_array("Glob patterns limiting which files are searched; empty for all"),
    );
    properties.insert(
        "limit".to_string(),
        JsonSchema::number("Maximum number of matching lines to return"),
    );
    ToolSpec::function(
        "grep_files",
        "Searches files under a directory for a regular expression",
        properties,
        &["pattern", "path", "include", "limit"],
    )
}

pub(crate) fn run(args: GrepFilesArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    if args.limit == 0 {
        return Err(LinconaErr::InvalidArguments(
            "field `limit` must be at least 1".to_string(),
        ));
    }
    let regex = Regex::new(&args.pattern).map_err(|e| {
        LinconaErr::InvalidArguments(format!("field `pattern` is not a valid regex: {e}"))
    })?;
    let root = boundary.resolve(Path::new(&args.path))?;

    let mut walk = WalkBuilder::new(&root);
    if !args.include.is_empty() {
        let mut overrides = OverrideBuilder::new(&root);
        for glob in &args.include {
            overrides.add(glob).map_err(|e| {
                LinconaErr::InvalidArguments(format!("field `include` has a bad glob: {e}"))
            })?;
        }
        let overrides = overrides.build().map_err(|e| {
            LinconaErr::InvalidArguments(format!("field `include` has a bad glob: {e}"))
        })?;
        walk.overrides(overrides);
    }

    let mut files: Vec<std::path::PathBuf> = walk
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let mut results: Vec<FileMatches> = Vec::new();
    let mut hits = 0usize;
    'files: for file in files {
        // Binary and non-UTF-8 files are skipped.
        let Ok(bytes) = std::fs::read(&file) else {
            continue;
        };
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        let mut matches: Vec<LineMatch> = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(LineMatch {
                    line_num: idx + 1,
                    line: line.to_string(),
                });
                hits += 1;
                if hits >= args.limit {
                    push_matches(&mut results, &root, &file, matches);
                    break 'files;
                }
            }
        }
        push_matches(&mut results, &root, &file, matches);
    }

    let text: String = results
        .iter()
        .flat_map(|fm| {
            fm.matches
                .iter()
                .map(move |m| format!("{}:{}:{}\n", fm.file, m.line_num, m.line))
        })
        .collect();
    let payload = serde_json::to_value(&results)?;
    Ok(ToolResult::ok_with_payload(text, payload))
}

fn push_matches(
    results: &mut Vec<FileMatches>,
    root: &Path,
    file: &Path,
    matches: Vec<LineMatch>,
) {
    if matches.is_empty() {
        return;
    }
    let name = file
        .strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .to_string();
    results.push(FileMatches {
        file: name,
        matches,
    });
}
