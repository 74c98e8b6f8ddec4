//! Runtime control commands, entered as `/<command> [argument]`.

use std::collections::HashMap;

use strum::IntoEnumIterator;
use strum_macros::AsRefStr;
use strum_macros::EnumIter;
use strum_macros::EnumString;
use strum_macros::IntoStaticStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum SlashCommand {
    Newsession,
    Model,
    Reasoning,
    Approvals,
    Fsmode,
    Help,
    Quit,
}

impl SlashCommand {
    /// User-visible description shown by `/help`.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Newsession => "Flush the current session and start a fresh one.",
            SlashCommand::Model => "Switch the model: /model <id>",
            SlashCommand::Reasoning => {
                "Set reasoning effort: /reasoning <none|minimal|low|medium|high>"
            }
            SlashCommand::Approvals => "Set approval policy: /approvals <never|on-request|always>",
            SlashCommand::Fsmode => "Set filesystem mode: /fsmode <restricted|unrestricted>",
            SlashCommand::Help => "Show this help.",
            SlashCommand::Quit => "Exit the program.",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// All built-in commands keyed by their command string.
pub fn built_in_slash_commands() -> HashMap<&'static str, SlashCommand> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Split `/command arg...` into the command token and the rest. Returns
/// `None` when `input` does not start with a slash.
pub fn parse_slash_input(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default().trim();
    Some((command, argument))
}
