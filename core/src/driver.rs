// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

//! The conversation driver: owns session state, runs turns against the model
//! client, routes tool calls, persists every event, and applies slash
//! commands to the session overlay.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use futures::StreamExt;
use tokio::sync::Notify;
use tracing::error;

use crate::boundary::FsBoundary;
use crate::client::ModelClient;
use crate::client_common::ConversationRequest;
use crate::client_common::ModelEvent;
use crate::config::ResolvedConfig;
use crate::error::LinconaErr;
use crate::error::Result;
use crate::events::EventPayload;
use crate::events::EventWriter;
use crate::models::Message;
use crate::models::ToolCall;
use crate::models::ToolResult;
use crate::pty::PtyManager;
use crate::session::SessionState;
use crate::session_log::DEFAULT_MAX_LOG_BYTES;
use crate::session_log::LogLevel;
use crate::session_log::SessionLogger;
use crate::shutdown::ShutdownCoordinator;
use crate::slash_command::SlashCommand;
use crate::slash_command::built_in_slash_commands;
use crate::slash_command::parse_slash_input;
use crate::tools::ApprovalPrompt;
use crate::tools::ToolContext;
use crate::tools::ToolRegistry;

/// Model-initiated tool calls permitted within one turn.
pub const MAX_TOOL_HOPS: usize = 8;
/// Hard cap on request legs per turn, bounding the loop even when the model
/// keeps calling tools after the hop limit was reached.
const MAX_TURN_LEGS: usize = MAX_TOOL_HOPS + 2;
/// Transcript fsync cadence.
const FSYNC_EVERY: Option<u32> = Some(16);

/// How the front-end hears about a turn while it runs.
pub trait TurnObserver {
    /// A streamed chunk of assistant text.
    fn text_delta(&mut self, text: &str);
    /// The in-progress assistant message is complete.
    fn message_complete(&mut self);
    /// Out-of-band information: slash-command feedback, tool progress,
    /// one-line errors.
    fn notice(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Continue,
    Quit,
}

pub struct Driver {
    config: Arc<ResolvedConfig>,
    client: ModelClient,
    registry: ToolRegistry,
    boundary: FsBoundary,
    pty: Arc<PtyManager>,
    writer: Arc<Mutex<EventWriter>>,
    logger: Arc<Mutex<SessionLogger>>,
    approver: Arc<dyn ApprovalPrompt>,
    ctrl_c: Arc<Notify>,
    state: SessionState,
}

impl Driver {
    pub fn new(
        config: Arc<ResolvedConfig>,
        client: ModelClient,
        approver: Arc<dyn ApprovalPrompt>,
        ctrl_c: Arc<Notify>,
        shutdown: &ShutdownCoordinator,
    ) -> Result<Self> {
        let state = SessionState::new(&config);
        let boundary = FsBoundary::new(&config.cwd, state.filesystem_mode)?;
        let pty = PtyManager::new();
        let writer = EventWriter::open(&config.sessions_dir(), &state.id, FSYNC_EVERY)
            .map_err(|e| LinconaErr::Fatal(format!("cannot open transcript writer: {e}")))?;
        let writer = Arc::new(Mutex::new(writer));
        let logger = SessionLogger::open(
            &config.logs_dir(),
            &state.id,
            Some(DEFAULT_MAX_LOG_BYTES),
        )?;
        let logger = Arc::new(Mutex::new(logger));

        shutdown.register_logger(Arc::clone(&logger));
        shutdown.register_writer(Arc::clone(&writer));
        shutdown.register_pty_manager(Arc::clone(&pty));

        let mut driver = Self {
            config,
            client,
            registry: ToolRegistry::new(),
            boundary,
            pty,
            writer,
            logger,
            approver,
            ctrl_c,
            state,
        };
        driver.push_event(EventPayload::System {
            message: format!("session {} started", driver.state.id),
        })?;
        Ok(driver)
    }

    pub fn session_id(&self) -> &str {
        &self.state.id
    }

    pub fn log_path(&self) -> std::path::PathBuf {
        self.logger.lock().unwrap().path().to_path_buf()
    }

    /// Handle one line of user input: a slash command or a model turn.
    pub async fn handle_input(
        &mut self,
        input: &str,
        observer: &mut dyn TurnObserver,
    ) -> Result<InputOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(InputOutcome::Continue);
        }
        if input.starts_with('/') {
            return self.handle_slash(input, observer).await;
        }
        self.run_turn(input, observer).await?;
        Ok(InputOutcome::Continue)
    }

    async fn handle_slash(
        &mut self,
        input: &str,
        observer: &mut dyn TurnObserver,
    ) -> Result<InputOutcome> {
        self.push_event(EventPayload::SlashCommand {
            command: input.to_string(),
        })?;
        let Some((command, argument)) = parse_slash_input(input) else {
            observer.notice("not a slash command");
            return Ok(InputOutcome::Continue);
        };
        let Some(command) = built_in_slash_commands().get(command).copied() else {
            observer.notice(&format!("unknown command: /{command} (try /help)"));
            return Ok(InputOutcome::Continue);
        };

        match command {
            SlashCommand::Help => {
                let mut help = String::from("commands:\n");
                for (name, command) in sorted_commands() {
                    help.push_str(&format!("  /{name:<12} {}\n", command.description()));
                }
                observer.notice(help.trim_end());
            }
            SlashCommand::Quit => return Ok(InputOutcome::Quit),
            SlashCommand::Newsession => {
                self.rotate_session().await?;
                observer.notice(&format!("started session {}", self.state.id));
            }
            SlashCommand::Model => {
                if self.config.allowed_models.iter().any(|m| m == argument) {
                    self.state.model = argument.to_string();
                    observer.notice(&format!("model set to {argument}"));
                } else {
                    observer.notice(&format!(
                        "unknown model '{argument}'; allowed: {}",
                        self.config.allowed_models.join(", ")
                    ));
                }
            }
            SlashCommand::Reasoning => match argument.parse() {
                Ok(effort) => {
                    self.state.reasoning_effort = effort;
                    observer.notice(&format!("reasoning effort set to {effort}"));
                }
                Err(_) => observer.notice(&format!(
                    "invalid reasoning effort '{argument}'; expected none|minimal|low|medium|high"
                )),
            },
            SlashCommand::Approvals => match argument.parse() {
                Ok(policy) => {
                    self.state.approval_policy = policy;
                    observer.notice(&format!("approval policy set to {policy}"));
                }
                Err(_) => observer.notice(&format!(
                    "invalid approval policy '{argument}'; expected never|on-request|always"
                )),
            },
            SlashCommand::Fsmode => match argument.parse() {
                Ok(mode) => {
                    self.boundary = FsBoundary::new(&self.config.cwd, mode)?;
                    self.state.filesystem_mode = mode;
                    observer.notice(&format!("filesystem mode set to {mode}"));
                }
                Err(_) => observer.notice(&format!(
                    "invalid filesystem mode '{argument}'; expected restricted|unrestricted"
                )),
            },
        }
        Ok(InputOutcome::Continue)
    }

    /// Close out the current session's files and PTYs, then start fresh.
    async fn rotate_session(&mut self) -> Result<()> {
        self.pty.close_all().await;
        self.writer.lock().unwrap().close()?;
        self.logger.lock().unwrap().close()?;

        self.state = SessionState::new(&self.config);
        self.boundary = FsBoundary::new(&self.config.cwd, self.state.filesystem_mode)?;
        *self.writer.lock().unwrap() =
            EventWriter::open(&self.config.sessions_dir(), &self.state.id, FSYNC_EVERY)
                .map_err(|e| LinconaErr::Fatal(format!("cannot open transcript writer: {e}")))?;
        *self.logger.lock().unwrap() = SessionLogger::open(
            &self.config.logs_dir(),
            &self.state.id,
            Some(DEFAULT_MAX_LOG_BYTES),
        )?;
        self.push_event(EventPayload::System {
            message: format!("session {} started", self.state.id),
        })?;
        Ok(())
    }

    /// One full turn: send history, stream the reply, execute tool calls and
    /// feed their results back until the model finishes or errors.
    async fn run_turn(&mut self, input: &str, observer: &mut dyn TurnObserver) -> Result<()> {
        self.push_event(EventPayload::UserMessage {
            text: input.to_string(),
        })?;
        self.log(LogLevel::Info, &format!("user: {input}"));
        self.state.messages.push(Message::user(input));

        let mut hops = 0usize;
        for _leg in 0..MAX_TURN_LEGS {
            let request = self.build_request();
            let mut stream = match self.client.stream(&request).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.record_turn_error(&e, observer)?;
                    return Ok(());
                }
            };

            let mut text_parts: BTreeMap<u32, String> = BTreeMap::new();
            let mut leg_results: Vec<(ToolCall, ToolResult)> = Vec::new();
            loop {
                // Listen for the next stream event or a SIGINT; the handler
                // runs outside the select so the stream can be dropped there.
                let next = {
                    let interrupted = self.ctrl_c.notified();
                    tokio::select! {
                        biased;
                        _ = interrupted => None,
                        event = stream.next() => Some(event),
                    }
                };
                let Some(event) = next else {
                    drop(stream);
                    let e = LinconaErr::Stream("turn interrupted by user".to_string());
                    self.record_turn_error(&e, observer)?;
                    return Ok(());
                };
                let Some(event) = event else { break };
                match event {
                    Ok(ModelEvent::TextDelta { index, text }) => {
                        observer.text_delta(&text);
                        text_parts.entry(index).or_default().push_str(&text);
                    }
                    Ok(ModelEvent::MessageDone { .. }) => observer.message_complete(),
                    Ok(ModelEvent::ToolCallStart { .. }) => {}
                    Ok(ModelEvent::ToolCallReady {
                        call_id,
                        name,
                        args_json,
                    }) => {
                        hops += 1;
                        let call = ToolCall {
                            call_id,
                            name,
                            arguments: args_json,
                        };
                        let result = self.execute_tool_call(&call, hops, observer).await?;
                        leg_results.push((call, result));
                    }
                    Ok(ModelEvent::TurnDone) => break,
                    Err(e) => {
                        self.record_turn_error(&e, observer)?;
                        return Ok(());
                    }
                }
            }

            let text: String = text_parts.into_values().collect();
            if leg_results.is_empty() {
                if !text.is_empty() {
                    self.push_event(EventPayload::AssistantMessage { text: text.clone() })?;
                    self.state.messages.push(Message::assistant(text));
                }
                return Ok(());
            }

            // Second leg within the same turn: the assistant message with its
            // calls, then one tool message per result.
            let calls: Vec<ToolCall> = leg_results.iter().map(|(call, _)| call.clone()).collect();
            if !text.is_empty() {
                self.push_event(EventPayload::AssistantMessage { text: text.clone() })?;
            }
            self.state
                .messages
                .push(Message::assistant_with_calls(text, calls));
            for (call, result) in leg_results {
                self.state
                    .messages
                    .push(Message::tool(call.call_id, result.content));
            }
        }

        // The model kept calling tools past the hop limit; stop the turn.
        self.push_event(EventPayload::Error {
            kind: "tool-hop-limit".to_string(),
            message: "tool-hop limit reached; turn aborted".to_string(),
        })?;
        self.log(LogLevel::Error, "tool-hop limit reached; turn aborted");
        observer.notice("error: tool-hop limit reached; turn aborted");
        Ok(())
    }

    async fn execute_tool_call(
        &mut self,
        call: &ToolCall,
        hops: usize,
        observer: &mut dyn TurnObserver,
    ) -> Result<ToolResult> {
        self.push_event(EventPayload::ToolCall {
            call_id: call.call_id.clone(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
        })?;
        self.log(
            LogLevel::Info,
            &format!("tool call {}: {} {}", call.call_id, call.name, call.arguments),
        );
        observer.notice(&format!("running {}", call.name));

        let result = if hops > MAX_TOOL_HOPS {
            ToolResult::error("tool-hop limit reached")
        } else {
            let ctx = ToolContext {
                boundary: &self.boundary,
                pty: &self.pty,
                approval_policy: self.state.approval_policy,
                approver: self.approver.as_ref(),
            };
            self.registry
                .dispatch(&call.name, &call.arguments, &ctx)
                .await?
        };

        if result.truncated {
            self.push_event(EventPayload::TruncationNotice {
                call_id: call.call_id.clone(),
            })?;
        }
        self.push_event(EventPayload::ToolResult {
            call_id: call.call_id.clone(),
            success: result.success,
            content: result.content.clone(),
            truncated: result.truncated,
        })?;
        self.log(
            LogLevel::Debug,
            &format!("tool result {}: success={}", call.call_id, result.success),
        );
        Ok(result)
    }

    fn build_request(&self) -> ConversationRequest {
        ConversationRequest {
            model: self.state.model.clone(),
            input: self.state.messages.clone(),
            tools: self.registry.tool_specs(),
            reasoning_effort: self.state.reasoning_effort,
            verbosity: Some(self.config.verbosity),
        }
    }

    /// Persist an error event, log the full error, and surface a one-liner.
    fn record_turn_error(
        &mut self,
        e: &LinconaErr,
        observer: &mut dyn TurnObserver,
    ) -> Result<()> {
        error!("turn failed: {e}");
        self.push_event(EventPayload::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        })?;
        self.log(LogLevel::Error, &e.to_string());
        observer.notice(&format!(
            "error: {e} (details in {})",
            self.log_path().display()
        ));
        Ok(())
    }

    /// Persist a fatal error on the way down. Best effort by design: the
    /// writer itself may be what failed.
    pub fn record_fatal(&mut self, e: &LinconaErr) {
        let _ = self.push_event(EventPayload::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        });
        self.log(LogLevel::Error, &e.to_string());
    }

    fn push_event(&mut self, payload: EventPayload) -> Result<()> {
        self.writer.lock().unwrap().append(payload)?;
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.logger.lock().unwrap().log_at(level, message) {
            error!("session log write failed: {e}");
        }
    }

    /// Read-only view of the session overlay; the driver stays sole mutator.
    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

fn sorted_commands() -> Vec<(&'static str, SlashCommand)> {
    let mut commands: Vec<(&'static str, SlashCommand)> =
        built_in_slash_commands().into_iter().collect();
    commands.sort_by_key(|(name, _)| *name);
    commands
}
