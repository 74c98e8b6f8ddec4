//! Thin interactive front-end over `lincona-core`: flag handling, logger
//! init, the stdin read loop, approval prompts, and exit codes.

use std::io::Write;
use std::io::stdin;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;

use lincona_core::ModelClient;
use lincona_core::config::ResolvedConfig;
use lincona_core::config::lincona_home;
use lincona_core::driver::Driver;
use lincona_core::driver::InputOutcome;
use lincona_core::driver::TurnObserver;
use lincona_core::shutdown::ShutdownCoordinator;
use lincona_core::tools::ApprovalPrompt;
use owo_colors::OwoColorize;
use owo_colors::Style;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::io::Stdin;
use tokio::sync::Notify;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;
pub use cli::Cli;

/// Environment variable carrying the bearer token.
pub const API_KEY_ENV_VAR: &str = "LINCONA_API_KEY";
/// Environment variable overriding the endpoint base URL.
pub const BASE_URL_ENV_VAR: &str = "LINCONA_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5";
const ALLOWED_MODELS: &[&str] = &["gpt-5", "gpt-5-mini", "gpt-4.1", "o4-mini"];

/// Exit codes: 0 normal, 1 unhandled error, 2 invalid invocation (also used
/// by clap for flag errors), 130 SIGINT-initiated quit.
pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_SIGINT: i32 = 130;

/// Initialize the global logger once at startup based on the `--verbose`
/// flag. Diagnostics go to stderr so they never interleave with the
/// streaming assistant output on stdout.
fn init_logger(verbose: u8, allow_ansi: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "lincona=debug",
        _ => "lincona=trace",
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_ansi(allow_ansi)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the CLI; the returned code is handed to `std::process::exit`.
pub async fn run_main(cli: Cli) -> i32 {
    init_logger(cli.verbose, !cli.no_ansi);

    let config = match build_config(&cli) {
        Ok(config) => Arc::new(config),
        Err(message) => {
            eprintln!("{message}");
            return EXIT_USAGE;
        }
    };

    let shutdown = ShutdownCoordinator::new();
    let ctrl_c = shutdown.listen_for_signals();

    let client = ModelClient::new(&config);
    let approver = Arc::new(StdinApproval);
    let mut driver = match Driver::new(
        Arc::clone(&config),
        client,
        approver,
        Arc::clone(&ctrl_c),
        &shutdown,
    ) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("failed to start session: {e}");
            shutdown.shutdown().await;
            return EXIT_ERROR;
        }
    };
    debug!(session = driver.session_id(), "session ready");

    let code = run_loop(&cli, &mut driver, Arc::clone(&ctrl_c)).await;
    shutdown.shutdown().await;
    code
}

fn build_config(cli: &Cli) -> Result<ResolvedConfig, String> {
    let api_key = std::env::var(API_KEY_ENV_VAR)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| format!("missing bearer token: set {API_KEY_ENV_VAR}"))?;
    let base_url = std::env::var(BASE_URL_ENV_VAR)
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let data_root = lincona_home().map_err(|e| format!("cannot resolve data root: {e}"))?;
    let cwd = std::env::current_dir()
        .map_err(|e| format!("cannot resolve working directory: {e}"))?;

    let model = cli.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let mut allowed_models: Vec<String> = ALLOWED_MODELS.iter().map(|m| m.to_string()).collect();
    if !allowed_models.contains(&model) {
        allowed_models.push(model.clone());
    }

    Ok(ResolvedConfig {
        api_key,
        model,
        allowed_models,
        reasoning_effort: cli.reasoning.unwrap_or_default(),
        verbosity: Default::default(),
        filesystem_mode: cli.filesystem_mode.unwrap_or_default(),
        approval_policy: cli.approval_policy.unwrap_or_default(),
        log_level: "info".to_string(),
        data_root,
        base_url,
        request_timeout: Duration::from_secs(60),
        cwd,
    })
}

async fn run_loop(cli: &Cli, driver: &mut Driver, ctrl_c: Arc<Notify>) -> i32 {
    let mut observer = ConsoleObserver::default();

    if let Some(prompt) = &cli.prompt {
        return match driver.handle_input(prompt, &mut observer).await {
            Ok(_) => EXIT_OK,
            Err(e) => {
                driver.record_fatal(&e);
                eprintln!("error: {e} (details in {})", driver.log_path().display());
                EXIT_ERROR
            }
        };
    }

    let mut reader = InputReader::new(ctrl_c);
    loop {
        let line = match reader.request_input().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                // Ctrl-D at the prompt.
                println!();
                return EXIT_OK;
            }
            Err(e) => {
                eprintln!("input error: {e}");
                return EXIT_ERROR;
            }
        };
        if line == InputReader::INTERRUPTED {
            // SIGINT at an idle prompt quits.
            println!();
            return EXIT_SIGINT;
        }
        match driver.handle_input(&line, &mut observer).await {
            Ok(InputOutcome::Continue) => {}
            Ok(InputOutcome::Quit) => return EXIT_OK,
            Err(e) => {
                driver.record_fatal(&e);
                eprintln!("error: {e} (details in {})", driver.log_path().display());
                return EXIT_ERROR;
            }
        }
    }
}

/// Prints streamed assistant text to stdout and notices to stderr-ish dim
/// styling on stdout, mirroring the chat layout.
#[derive(Default)]
struct ConsoleObserver {
    in_message: bool,
}

impl TurnObserver for ConsoleObserver {
    fn text_delta(&mut self, text: &str) {
        if !self.in_message {
            print!("{}> ", "lincona".bold());
            self.in_message = true;
        }
        print!("{text}");
        let _ = stdout().flush();
    }

    fn message_complete(&mut self) {
        if self.in_message {
            println!();
            self.in_message = false;
        }
    }

    fn notice(&mut self, message: &str) {
        if self.in_message {
            println!();
            self.in_message = false;
        }
        let style = Style::new().fg_rgb::<127, 127, 127>();
        println!("{}", message.style(style));
    }
}

/// Approval prompt on stdin: anything but y/yes denies.
struct StdinApproval;

impl ApprovalPrompt for StdinApproval {
    fn request(&self, tool: &str, summary: &str) -> bool {
        println!("approve {tool}? {summary} (y/N): ");
        let _ = stdout().flush();
        let mut line = String::new();
        if stdin().read_line(&mut line).is_err() {
            return false;
        }
        let answer = line.trim().to_ascii_lowercase();
        answer == "y" || answer == "yes"
    }
}

struct InputReader {
    reader: Lines<BufReader<Stdin>>,
    ctrl_c: Arc<Notify>,
}

impl InputReader {
    /// Sentinel returned when SIGINT arrived while waiting at the prompt.
    const INTERRUPTED: &'static str = "\u{0003}";

    fn new(ctrl_c: Arc<Notify>) -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()).lines(),
            ctrl_c,
        }
    }

    async fn request_input(&mut self) -> std::io::Result<Option<String>> {
        print!("{}> ", "user".bold());
        stdout().flush()?;
        let interrupted = self.ctrl_c.notified();
        tokio::select! {
            line = self.reader.next_line() => {
                match line? {
                    Some(input) => Ok(Some(input.trim().to_string())),
                    None => Ok(None),
                }
            }
            _ = interrupted => Ok(Some(Self::INTERRUPTED.to_string())),
        }
    }
}
