use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinconaErr>;

#[derive(Error, Debug)]
pub enum LinconaErr {
    /// Tool input failed schema validation; the message names the field.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A resolved path escaped the restricted root.
    #[error("path escapes the workspace boundary: {0}")]
    OutsideBoundary(String),

    /// The patch is malformed, targets are missing, or context mismatched.
    #[error("patch verification failed: {0}")]
    PatchVerification(String),

    /// Mid-apply I/O failure; rollback was executed, no partial state remains.
    #[error("patch apply failed (rolled back): {0}")]
    PatchApplyFailed(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// The approval policy refused the call.
    #[error("approval policy forbids running `{0}` without confirmation")]
    ApprovalDenied(String),

    /// A shell command, HTTP request, or PTY read exceeded its cap.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown PTY session: {0}")]
    PtyUnknownSession(String),

    #[error("PTY session already open: {0}")]
    PtyAlreadyOpen(String),

    /// Non-retryable transport failure: 401, other non-429 4xx, or a
    /// connection that kept failing after the retry budget was spent.
    #[error("transport failure: {0}")]
    TransportFatal(String),

    /// Retry budget exhausted on a retryable status.
    #[error("exceeded retry limit, last status: {0}")]
    RetryLimit(StatusCode),

    /// The SSE stream disconnected or errored after the HTTP handshake
    /// succeeded but before the turn completed.
    #[error("stream disconnected before completion: {0}")]
    Stream(String),

    /// Malformed SSE payload or tool-argument JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// A condition that corrupts invariants. Bypasses the model-visible error
    /// path and terminates the turn.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LinconaErr {
    /// Errors that must not be fed back to the model as a tool result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinconaErr::Fatal(_))
    }

    /// Short tag used in persisted error events.
    pub fn kind(&self) -> &'static str {
        match self {
            LinconaErr::InvalidArguments(_) => "invalid-arguments",
            LinconaErr::OutsideBoundary(_) => "outside-boundary",
            LinconaErr::PatchVerification(_) => "patch-verification",
            LinconaErr::PatchApplyFailed(_) => "patch-apply-failed",
            LinconaErr::ToolNotFound(_) => "tool-not-found",
            LinconaErr::ApprovalDenied(_) => "approval-denied",
            LinconaErr::Timeout(_) => "timeout",
            LinconaErr::PtyUnknownSession(_) => "pty-unknown-session",
            LinconaErr::PtyAlreadyOpen(_) => "pty-already-open",
            LinconaErr::TransportFatal(_) | LinconaErr::RetryLimit(_) => "transport-fatal",
            LinconaErr::Stream(_) => "stream",
            LinconaErr::Parse(_) => "parse",
            LinconaErr::Fatal(_) => "fatal",
            LinconaErr::Io(_) => "io",
            LinconaErr::Reqwest(_) => "transport",
            LinconaErr::Json(_) => "json",
        }
    }
}

impl From<lincona_apply_patch::PatchError> for LinconaErr {
    fn from(err: lincona_apply_patch::PatchError) -> Self {
        use lincona_apply_patch::PatchError;
        match err {
            PatchError::Apply { .. } => LinconaErr::PatchApplyFailed(err.to_string()),
            PatchError::Parse(_) | PatchError::Verify { .. } | PatchError::Empty => {
                LinconaErr::PatchVerification(err.to_string())
            }
        }
    }
}
