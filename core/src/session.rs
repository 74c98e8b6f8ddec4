//! Per-session mutable state. The driver is the sole mutator.

use chrono::Utc;
use rand::Rng;

use crate::config::ApprovalPolicy;
use crate::config::FilesystemMode;
use crate::config::ReasoningEffort;
use crate::config::ResolvedConfig;
use crate::models::Message;

/// Session-scoped overlay over the immutable [`ResolvedConfig`]: slash
/// commands mutate this, never the config itself.
#[derive(Debug)]
pub struct SessionState {
    /// `YYYYMMDDHHMM-<128-bit hex>`.
    pub id: String,
    /// Ordered history; messages are immutable once appended.
    pub messages: Vec<Message>,
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    pub filesystem_mode: FilesystemMode,
    pub approval_policy: ApprovalPolicy,
}

impl SessionState {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            id: generate_session_id(),
            messages: Vec::new(),
            model: config.model.clone(),
            reasoning_effort: config.reasoning_effort,
            filesystem_mode: config.filesystem_mode,
            approval_policy: config.approval_policy,
        }
    }
}

/// UTC minute-resolution timestamp plus 128 random bits, collision-resistant
/// across concurrent sessions.
pub fn generate_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M");
    let random: u128 = rand::rng().random();
    format!("{stamp}-{random:032x}")
}
