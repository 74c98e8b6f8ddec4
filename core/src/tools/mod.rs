//! Tool registry and router.
//!
//! The tool set is a closed union: every tool is a [`ToolKind`] variant with
//! its schema, approval flag and handler registered by [`ToolRegistry::new`].
//! `tool_specs` is the authoritative schema surface serialized to the model;
//! `dispatch` funnels every invocation through input validation, the
//! filesystem boundary (inside each handler) and the approval gate, and
//! converts non-fatal failures into model-visible error results.

mod apply_patch;
mod exec_command;
mod grep_files;
mod list_dir;
mod read_file;
mod shell;
pub(crate) mod spec;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use tracing::info;

use crate::boundary::FsBoundary;
use crate::config::ApprovalPolicy;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::models::ToolResult;
use crate::pty::PtyManager;
pub use spec::ToolSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListDir,
    ReadFile,
    GrepFiles,
    ApplyPatchJson,
    ApplyPatchFreeform,
    Shell,
    ExecCommand,
    WriteStdin,
}

pub struct Registration {
    pub kind: ToolKind,
    pub spec: ToolSpec,
    pub requires_approval: bool,
}

/// Host-provided approval hook. Blocking is fine: the prompt is one of the
/// driver's defined suspension points.
pub trait ApprovalPrompt: Send + Sync {
    fn request(&self, tool: &str, summary: &str) -> bool;
}

/// Everything a handler may touch besides its own arguments.
pub struct ToolContext<'a> {
    pub boundary: &'a FsBoundary,
    pub pty: &'a Arc<PtyManager>,
    pub approval_policy: ApprovalPolicy,
    pub approver: &'a dyn ApprovalPrompt,
}

pub struct ToolRegistry {
    tools: Vec<Registration>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let tools = vec![
            Registration {
                kind: ToolKind::ListDir,
                spec: list_dir::spec(),
                requires_approval: false,
            },
            Registration {
                kind: ToolKind::ReadFile,
                spec: read_file::spec(),
                requires_approval: false,
            },
            Registration {
                kind: ToolKind::GrepFiles,
                spec: grep_files::spec(),
                requires_approval: false,
            },
            Registration {
                kind: ToolKind::ApplyPatchJson,
                spec: apply_patch::json_spec(),
                requires_approval: false,
            },
            Registration {
                kind: ToolKind::ApplyPatchFreeform,
                spec: apply_patch::freeform_spec(),
                requires_approval: false,
            },
            Registration {
                kind: ToolKind::Shell,
                spec: shell::spec(),
                requires_approval: true,
            },
            Registration {
                kind: ToolKind::ExecCommand,
                spec: exec_command::exec_spec(),
                requires_approval: true,
            },
            Registration {
                kind: ToolKind::WriteStdin,
                spec: exec_command::write_stdin_spec(),
                requires_approval: true,
            },
        ];
        Self { tools }
    }

    /// The tool array delivered to the model, in registration order.
    pub fn tool_specs(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .filter_map(|r| serde_json::to_value(&r.spec).ok())
            .collect()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.tools
    }

    /// Validate and run one tool call. Non-fatal failures come back as
    /// `Ok(ToolResult { success: false, .. })` so the model can recover;
    /// `Err` is reserved for fatal conditions.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        raw_args: &str,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult> {
        info!(tool = tool_name, "tool request");
        let result = self.dispatch_inner(tool_name, raw_args, ctx).await;
        match result {
            Ok(result) => {
                debug!(tool = tool_name, success = result.success, "tool response");
                Ok(result)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(tool = tool_name, error = %e, "tool response");
                Ok(ToolResult::error(e.to_string()))
            }
        }
    }

    async fn dispatch_inner(
        &self,
        tool_name: &str,
        raw_args: &str,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult> {
        let Some(registration) = self.tools.iter().find(|r| r.spec.name() == tool_name) else {
            return Err(LinconaErr::ToolNotFound(tool_name.to_string()));
        };

        match registration.kind {
            ToolKind::ListDir => {
                let args = parse_args::<list_dir::ListDirArgs>(raw_args)?;
                list_dir::run(args, ctx.boundary)
            }
            ToolKind::ReadFile => {
                let args = parse_args::<read_file::ReadFileArgs>(raw_args)?;
                read_file::run(args, ctx.boundary)
            }
            ToolKind::GrepFiles => {
                let args = parse_args::<grep_files::GrepFilesArgs>(raw_args)?;
                grep_files::run(args, ctx.boundary)
            }
            ToolKind::ApplyPatchJson => {
                let args = parse_args::<apply_patch::ApplyPatchArgs>(raw_args)?;
                apply_patch::run_unified(args, ctx.boundary)
            }
            ToolKind::ApplyPatchFreeform => {
                let args = parse_args::<apply_patch::ApplyPatchArgs>(raw_args)?;
                apply_patch::run_freeform(args, ctx.boundary)
            }
            ToolKind::Shell => {
                let args = parse_args::<shell::ShellArgs>(raw_args)?;
                check_approval(registration, ctx, &args.command)?;
                shell::run(args, ctx.boundary).await
            }
            ToolKind::ExecCommand => {
                let args = parse_args::<exec_command::ExecCommandArgs>(raw_args)?;
                check_approval(registration, ctx, &args.cmd)?;
                exec_command::run_exec(args, ctx.boundary, ctx.pty).await
            }
            ToolKind::WriteStdin => {
                let args = parse_args::<exec_command::WriteStdinArgs>(raw_args)?;
                let summary = format!("write {:?} to session {}", args.chars, args.session_id);
                check_approval(registration, ctx, &summary)?;
                exec_command::run_write_stdin(args, ctx.pty).await
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| LinconaErr::InvalidArguments(e.to_string()))
}

fn check_approval(
    registration: &Registration,
    ctx: &ToolContext<'_>,
    summary: &str,
) -> Result<()> {
    if !registration.requires_approval {
        return Ok(());
    }
    let tool = registration.spec.name();
    match ctx.approval_policy {
        ApprovalPolicy::Always => Ok(()),
        ApprovalPolicy::Never => Err(LinconaErr::ApprovalDenied(tool.to_string())),
        ApprovalPolicy::OnRequest => {
            if ctx.approver.request(tool, summary) {
                Ok(())
            } else {
                Err(LinconaErr::ApprovalDenied(tool.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::FilesystemMode;
    use tempfile::tempdir;

    struct DenyAll;
    impl ApprovalPrompt for DenyAll {
        fn request(&self, _tool: &str, _summary: &str) -> bool {
            false
        }
    }

    struct AllowAll;
    impl ApprovalPrompt for AllowAll {
        fn request(&self, _tool: &str, _summary: &str) -> bool {
            true
        }
    }

    fn context<'a>(
        boundary: &'a FsBoundary,
        pty: &'a Arc<PtyManager>,
        policy: ApprovalPolicy,
        approver: &'a dyn ApprovalPrompt,
    ) -> ToolContext<'a> {
        ToolContext {
            boundary,
            pty,
            approval_policy: policy,
            approver,
        }
    }

    #[tokio::test]
    async fn specs_cover_all_eight_tools() {
        let registry = ToolRegistry::new();
        let specs = registry.tool_specs();
        let names: Vec<&str> = specs
            .iter()
            .filter_map(|s| s["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_dir",
                "read_file",
                "grep_files",
                "apply_patch_json",
                "apply_patch_freeform",
                "shell",
                "exec_command",
                "write_stdin",
            ]
        );
        for spec in &specs {
            assert_eq!(spec["type"], "function");
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_model_visible() {
        let dir = tempdir().unwrap();
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let ctx = context(&boundary, &pty, ApprovalPolicy::Always, &AllowAll);
        let registry = ToolRegistry::new();
        let result = registry.dispatch("telepathy", "{}", &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_arguments_name_the_field() {
        let dir = tempdir().unwrap();
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let ctx = context(&boundary, &pty, ApprovalPolicy::Always, &AllowAll);
        let registry = ToolRegistry::new();
        let result = registry
            .dispatch("list_dir", "{\"path\":\".\"}", &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.content.contains("depth"), "got: {}", result.content);
    }

    #[tokio::test]
    async fn approval_never_refuses_shell_without_spawning() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("must-not-exist");
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let ctx = context(&boundary, &pty, ApprovalPolicy::Never, &AllowAll);
        let registry = ToolRegistry::new();
        let raw = format!(
            "{{\"command\":\"touch {}\",\"workdir\":null,\"timeout_ms\":null}}",
            marker.display()
        );
        let result = registry.dispatch("shell", &raw, &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.content.contains("approval policy forbids"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn approval_on_request_honours_the_callback() {
        let dir = tempdir().unwrap();
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let registry = ToolRegistry::new();

        let deny_ctx = context(&boundary, &pty, ApprovalPolicy::OnRequest, &DenyAll);
        let raw = "{\"command\":\"echo hi\",\"workdir\":null,\"timeout_ms\":null}";
        let result = registry.dispatch("shell", raw, &deny_ctx).await.unwrap();
        assert!(!result.success);

        let allow_ctx = context(&boundary, &pty, ApprovalPolicy::OnRequest, &AllowAll);
        let result = registry.dispatch("shell", raw, &allow_ctx).await.unwrap();
        assert!(result.success, "got: {}", result.content);
    }

    #[tokio::test]
    async fn read_only_tools_skip_approval() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x\n").unwrap();
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let ctx = context(&boundary, &pty, ApprovalPolicy::Never, &DenyAll);
        let registry = ToolRegistry::new();
        let raw = "{\"path\":\".\",\"depth\":0,\"offset\":0,\"limit\":10}";
        let result = registry.dispatch("list_dir", raw, &ctx).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn boundary_escape_comes_back_as_tool_error() {
        let dir = tempdir().unwrap();
        let boundary = FsBoundary::new(dir.path(), FilesystemMode::Restricted).unwrap();
        let pty = PtyManager::new();
        let ctx = context(&boundary, &pty, ApprovalPolicy::Always, &AllowAll);
        let registry = ToolRegistry::new();
        let raw = "{\"path\":\"/etc/passwd\",\"offset\":0,\"limit\":10,\"mode\":\"slice\",\"indent\":null}";
        let result = registry.dispatch("read_file", raw, &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.content.contains("boundary"));
    }
}
