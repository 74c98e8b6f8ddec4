//! One-shot shell execution with output caps and a hard timeout.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::debug;

use crate::boundary::FsBoundary;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::models::ToolResult;
use crate::tools::spec::JsonSchema;
use crate::tools::spec::ToolSpec;
use crate::truncate;

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Raw per-stream collection cap; the limiter trims further for the model.
const MAX_RAW_STREAM_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub(crate) struct ShellArgs {
    pub command: String,
    /// Nullable; defaults to the workspace root.
    pub workdir: Option<String>,
    /// Nullable; defaults to 60000.
    pub timeout_ms: Option<u64>,
}

pub(crate) fn spec() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "command".to_string(),
        JsonSchema::string("Command line passed to /bin/sh -c"),
    );
    properties.insert(
        "workdir".to_string(),
        JsonSchema::string("Working directory; null runs in the workspace root"),
    );
    properties.insert(
        "timeout_ms".to_string(),
        JsonSchema::number("Timeout in milliseconds; null means 60000"),
    );
    ToolSpec::function(
        "shell",
        "Runs a shell command and returns its output",
        properties,
        &["command", "workdir", "timeout_ms"],
    )
}

pub(crate) async fn run(args: ShellArgs, boundary: &FsBoundary) -> Result<ToolResult> {
    let timeout_ms = args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LinconaErr::InvalidArguments(
            "field `timeout_ms` must be at least 1".to_string(),
        ));
    }
    let workdir: PathBuf = match &args.workdir {
        Some(dir) => boundary.resolve(Path::new(dir))?,
        None => boundary.root().to_path_buf(),
    };
    if !workdir.is_dir() {
        return Err(LinconaErr::InvalidArguments(format!(
            "field `workdir`: {} is not a directory",
            workdir.display()
        )));
    }

    debug!(command = args.command, workdir = %workdir.display(), "spawning shell");
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&args.command)
        .current_dir(&workdir)
        // No stdin: some commands (ripgrep, for one) hang probing a live fd.
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| LinconaErr::Io(std::io::Error::other("stdout pipe not available")))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| LinconaErr::Io(std::io::Error::other("stderr pipe not available")))?;
    let stdout_handle = tokio::spawn(read_capped(BufReader::new(stdout_reader)));
    let stderr_handle = tokio::spawn(read_capped(BufReader::new(stderr_reader)));

    let timeout = Duration::from_millis(timeout_ms);
    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            child.start_kill()?;
            let _ = child.wait().await;
            (-1, true)
        }
    };

    let stdout_raw = stdout_handle
        .await
        .map_err(|e| LinconaErr::Fatal(format!("stdout reader task died: {e}")))??;
    let stderr_raw = stderr_handle
        .await
        .map_err(|e| LinconaErr::Fatal(format!("stderr reader task died: {e}")))??;

    let (stdout, stdout_truncated) =
        truncate::truncate_default(&String::from_utf8_lossy(&stdout_raw));
    let (stderr, stderr_truncated) =
        truncate::truncate_default(&String::from_utf8_lossy(&stderr_raw));

    let mut content = format!("exit code: {exit_code}\n");
    if timed_out {
        content.push_str(&format!("timed out after {timeout_ms} ms\n"));
    }
    if !stdout.is_empty() {
        content.push_str("stdout:\n");
        content.push_str(&stdout);
        if !content.ends_with('\n') {
            content.push('\n');
        }
    }
    if !stderr.is_empty() {
        content.push_str("stderr:\n");
        content.push_str(&stderr);
    }

    let payload = serde_json::json!({
        "stdout": stdout,
        "stderr": stderr,
        "returncode": exit_code,
        "stdout_truncated": stdout_truncated,
        "stderr_truncated": stderr_truncated,
        "timed_out": timed_out,
    });
    Ok(ToolResult {
        success: exit_code == 0 && !timed_out,
        content,
        payload: Some(payload),
        truncated: stdout_truncated || stderr_truncated,
    })
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        // Keep draining past the cap so the child never blocks on a full
        // pipe; bytes beyond the cap are discarded.
        if buf.len() < MAX_RAW_STREAM_BYTES {
            let take = n.min(MAX_RAW_STREAM_BYTES - buf.len());
            buf.extend_from_slice(&tmp[..take]);
        }
    }
    Ok(buf)
}
