//! The resolved configuration consumed by the core.
//!
//! Loading (config file parsing, flag merging, credential lookup) happens in
//! the front-end; the core only ever sees the final [`ResolvedConfig`] value.
//! It is constructed once before the driver starts and never mutated. Slash
//! commands change the *session* overlay in
//! [`crate::session::SessionState`], not this struct.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

/// Environment variable that overrides the default `~/.lincona` data root.
pub const LINCONA_HOME_ENV_VAR: &str = "LINCONA_HOME";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

/// Governs which paths tools may touch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FilesystemMode {
    /// Every tool-visible path must resolve inside the boundary root.
    #[default]
    Restricted,
    /// Any absolute path is allowed.
    Unrestricted,
}

/// Governs whether side-effectful tools may run without user confirmation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Side-effectful tool calls are refused outright.
    Never,
    /// The user is prompted for each side-effectful call.
    #[default]
    OnRequest,
    /// Side-effectful calls are auto-approved.
    Always,
}

/// Immutable, fully-resolved configuration. Observed identically by every
/// component that holds it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Bearer token presented to the model endpoint.
    pub api_key: String,

    /// Default model id for new sessions.
    pub model: String,

    /// Models accepted by the `/model` slash command.
    pub allowed_models: Vec<String>,

    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub filesystem_mode: FilesystemMode,
    pub approval_policy: ApprovalPolicy,

    /// Level tag for the per-session plaintext log.
    pub log_level: String,

    /// Directory holding `sessions/` and `logs/`.
    pub data_root: PathBuf,

    /// Base URL of the Responses-style endpoint; `/responses` is appended.
    pub base_url: String,

    /// Handshake timeout for each HTTP request, and the idle timeout for an
    /// open event stream.
    pub request_timeout: Duration,

    /// Boundary root for restricted mode; relative tool paths resolve here.
    pub cwd: PathBuf,
}

impl ResolvedConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_root.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }
}

/// Resolve the data root: `$LINCONA_HOME` if set, `~/.lincona` otherwise.
pub fn lincona_home() -> io::Result<PathBuf> {
    if let Ok(home) = std::env::var(LINCONA_HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    let mut home = dirs::home_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "could not determine home directory")
    })?;
    home.push(".lincona");
    Ok(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_from_kebab_case() {
        assert_eq!(
            "on-request".parse::<ApprovalPolicy>().ok(),
            Some(ApprovalPolicy::OnRequest)
        );
        assert_eq!(
            "unrestricted".parse::<FilesystemMode>().ok(),
            Some(FilesystemMode::Unrestricted)
        );
        assert_eq!(
            "minimal".parse::<ReasoningEffort>().ok(),
            Some(ReasoningEffort::Minimal)
        );
        assert!("sometimes".parse::<ApprovalPolicy>().is_err());
    }

    #[test]
    fn tags_display_in_kebab_case() {
        assert_eq!(ApprovalPolicy::OnRequest.to_string(), "on-request");
        assert_eq!(ReasoningEffort::High.to_string(), "high");
    }
}
