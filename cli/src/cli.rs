use clap::ArgAction;
use clap::Parser;
use lincona_core::config::ApprovalPolicy;
use lincona_core::config::FilesystemMode;
use lincona_core::config::ReasoningEffort;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Interactive coding agent that streams model replies and tool actions."
)]
pub struct Cli {
    /// One-shot prompt; when present the session ends after this turn.
    pub prompt: Option<String>,

    /// Override the default model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Reasoning effort requested from the model.
    #[arg(long)]
    pub reasoning: Option<ReasoningEffort>,

    /// When the model requires human approval before side-effectful tools.
    #[arg(long = "approvals", short = 'a')]
    pub approval_policy: Option<ApprovalPolicy>,

    /// Whether tool paths are confined to the working directory.
    #[arg(long = "fsmode")]
    pub filesystem_mode: Option<FilesystemMode>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    ///
    /// The flag may be passed up to three times. Without any -v the CLI only
    /// prints warnings and errors.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Don't use colored ansi output for verbose logging.
    #[arg(long)]
    pub no_ansi: bool,
}
