//! PTY-backed tools: `exec_command` opens a long-lived session,
//! `write_stdin` feeds one.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::boundary::FsBoundary;
use crate::error::Result;
use crate::models::ToolResult;
use crate::pty;
use crate::pty::PtyManager;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;

#[derive(Debug, Deserialize)]
pub(crate) struct ExecCommandArgs {
    pub session_id: String,
    pub cmd: String,
    /// Nullable; defaults to the workspace root.
    pub workdir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WriteStdinArgs {
    pub session_id: String,
    pub chars: String,
}

pub(crate) fn exec_spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::string("Caller-chosen id for the new session; must not already be open"),
    );
    properties.insert(
        "cmd".to_string(),
        JsonSchema::string("Command line run under /bin/sh -c in a fresh pseudoterminal"),
    );
    properties.insert(
        "workdir".to_string(),
        JsonSchema::string("Working directory; null runs in the workspace root"),
    );
    ToolSpec::function(
        "exec_command",
        "Starts a long-lived command in a pseudoterminal session and returns its initial output",
        properties,
        &["session_id", "cmd", "workdir"],
    )
}

pub(crate) fn write_stdin_spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "session_id".to_string(),
        JsonSchema::string("Id of an open pseudoterminal session"),
    );
    properties.insert(
        "chars".to_string(),
        JsonSchema::string("Characters written verbatim to the session's stdin; may be empty"),
    );
    ToolSpec::function(
        "write_stdin",
        "Writes to a pseudoterminal session's stdin and returns the output that follows",
        properties,
        &["session_id", "chars"],
    )
}

pub(crate) async fn run_exec(
    args: ExecCommandArgs,
    boundary: &FsBoundary,
    manager: &PtyManager,
) -> Result<ToolResult> {
    let workdir: PathBuf = match &args.workdir {
        Some(dir) => boundary.resolve(Path::new(dir))?,
        None => boundary.root().to_path_buf(),
    };
    let output = manager.open(&args.session_id, &args.cmd, &workdir).await?;
    Ok(into_result(output))
}

pub(crate) async fn run_write_stdin(args: WriteStdinArgs, manager: &PtyManager) -> Result<ToolResult> {
    let output = manager
        .write(
            &args.session_id,
            &args.chars,
            pty::DEFAULT_YIELD_MS,
            pty::MAX_CAPTURE_BYTES,
        )
        .await?;
    Ok(into_result(output))
}

fn into_result(output: pty::PtyOutput) -> ToolResult {
    let payload = serde_json::json!({
        "output": output.output,
        "truncated": output.truncated,
        "exited": output.exited,
    });
    ToolResult {
        success: true,
        content: output.output,
        payload: Some(payload),
        truncated: output.truncated,
    }
}
