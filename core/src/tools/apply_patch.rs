//! The two patch tools: both parse, resolve every target through the
//! boundary, verify against the working tree, and apply atomically.

use std::collections::BTreeMap;

use lincona_apply_patch::ChangeResult;
use lincona_apply_patch::PatchChange;
use lincona_apply_patch::parse_freeform;
use lincona_apply_patch::parse_unified;
use serde::Deserialize;

use crate::boundary::FsBoundary;
use crate::error::Result;
use crate::models::ToolResult;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;

#[derive(Debug, Deserialize)]
pub(crate) struct ApplyPatchArgs {
    pub patch: String,
}

pub(crate) fn freeform_spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "patch".to_string(),
        JsonSchema::string(
            "Patch in the freeform envelope: '*** Begin Patch' ... '*** End Patch' with \
             Add/Update/Delete File operations",
        ),
    );
    ToolSpec::function(
        "apply_patch_freeform",
        "Applies a freeform-envelope patch to the working tree atomically",
        properties,
        &["patch"],
    )
}

pub(crate) fn json_spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "patch".to_string(),
        JsonSchema::string("Patch as a conventional unified diff"),
    );
    ToolSpec::function(
        "apply_patch_json",
        "Applies a unified-diff patch to the working tree atomically",
        properties,
        &["patch"],
    )
}

pub(crate) fn run_freeform(args: ApplyPatchArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    let changes = parse_freeform(&args.patch).map_err(lincona_apply_patch::PatchError::from)?;
    apply_changes(changes, boundary)
}

pub(crate) fn run_unified(args: ApplyPatchArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    let changes = parse_unified(&args.patch).map_err(lincona_apply_patch::PatchError::from)?;
    apply_changes(changes, boundary)
}

fn apply_changes(changes: Vec<PatchChange>, boundary: &FsBoundary) -> Result<ToolResult> {
    // Resolve every target before anything is verified or written.
    let mut resolved = Vec::with_capacity(changes.len());
    for change in changes {
        let path = boundary.resolve(change.path())?;
        resolved.push(change.with_path(path));
    }

    let plan = lincona_apply_patch::verify(&resolved)?;
    let results = lincona_apply_patch::apply(plan)?;

    let text: String = results.iter().map(render_result).collect();
    let payload = serde_json::json!({ "changes": results });
    Ok(ToolResult::ok_with_payload(text, payload))
}

fn render_result(result: &ChangeResult) -> String {
    let tag = if result.created {
        "A"
    } else if result.bytes_written == 0 {
        "D"
    } else {
        "M"
    };
    format!(
        "{tag} {} ({} bytes)\n",
        result.path.display(),
        result.bytes_written
    )
}
