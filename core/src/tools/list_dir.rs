//! Breadth-first directory listing.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::boundary::FsBoundary;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::models::ToolResult;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;

#[derive(Debug, Deserialize)]
pub(crate) struct ListDirArgs {
    pub path: String,
    /// How many directory levels below `path` to descend into; 0 lists only
    /// the direct entries.
    pub depth: u32,
    pub offset: usize,
    pub limit: usize,
}

pub(crate) fn spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "path".to_string(),
        JsonSchema::string("Directory to list, absolute or relative to the workspace root"),
    );
    properties.insert(
        "depth".to_string(),
        JsonSchema::number("How many directory levels to descend; 0 lists direct entries only"),
    );
    properties.insert(
        "offset".to_string(),
        JsonSchema::number("Number of entries to skip from the start of the listing"),
    );
    properties.insert(
        "limit".to_string(),
        JsonSchema::number("Maximum number of entries to return"),
    );
    ToolSpec::function(
        "list_dir",
        "Lists directory entries breadth-first; directories carry a trailing slash",
        properties,
        &["path", "depth", "offset", "limit"],
    )
}

pub(crate) fn run(args: ListDirArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    if args.limit == 0 {
        return Err(LinconaErr::InvalidArguments(
            "field `limit` must be at least 1".to_string(),
        ));
    }
    let root = boundary.resolve(Path::new(&args.path))?;
    if !root.is_dir() {
        return Err(LinconaErr::InvalidArguments(format!(
            "field `path`: {} is not a directory",
            args.path
        )));
    }

    let mut entries: Vec<String> = Vec::new();
    let mut queue: VecDeque<(PathBuf, u32)> = VecDeque::new();
    queue.push_back((root.clone(), 0));
    while let Some((dir, level)) = queue.pop_front() {
        let mut children: Vec<(PathBuf, bool)> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let path = entry.path();
                let is_dir = path.is_dir();
                (path, is_dir)
            })
            .collect();
        children.sort();
        for (path, is_dir) in children {
            let relative = path.strip_prefix(&root).unwrap_or(&path);
            let mut name = relative.to_string_lossy().to_string();
            if is_dir {
                name.push('/');
                if level < args.depth {
                    queue.push_back((path, level + 1));
                }
            }
            entries.push(name);
        }
    }

    let page: Vec<String> = entries
        .into_iter()
        .skip(args.offset)
        .take(args.limit)
        .collect();
    let payload = serde_json::json!({ "entries": page });
    Ok(ToolResult::ok_with_payload(page.join("\n"), payload))
}
