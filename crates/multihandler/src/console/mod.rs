//! Operator console.
//!
//! A line-oriented read-eval loop over operator input. Commands query and
//! mutate the session registry or hand control to the shell bridge. Bad
//! input is reported and the loop carries on; only `exit` or the end of
//! input stops it.

pub mod bridge;
pub mod command;

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::config::ConsoleConfig;
use crate::session::{SessionId, SessionInfo, SessionRegistry};

pub use bridge::Detach;
pub use command::{help_text, Command, CommandError};

/// Escape sequence that homes the cursor and clears the screen.
const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

/// Shown after command output when the screen is cleared between commands.
const CONTINUE_PROMPT: &str = "Press Enter to continue...";

/// The interactive operator console.
pub struct Console<R, W> {
    registry: Arc<SessionRegistry>,
    input: Lines<R>,
    output: W,
    config: ConsoleConfig,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a console reading commands from `input` and printing to `output`.
    pub fn new(registry: Arc<SessionRegistry>, input: R, output: W, config: ConsoleConfig) -> Self {
        Self {
            registry,
            input: input.lines(),
            output,
            config,
        }
    }

    /// Consumes the console and returns its output sink.
    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs the loop until `exit` or end of input.
    ///
    /// Only failures to write to the local output are returned as errors.
    pub async fn run(&mut self) -> io::Result<()> {
        if !self.config.clear_screen {
            self.say(&help_text()).await?;
        }

        loop {
            if self.config.clear_screen {
                self.print(CLEAR_SCREEN).await?;
                self.say(&help_text()).await?;
            }
            let prompt = self.config.prompt.clone();
            self.print(&prompt).await?;

            let line = match self.input.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("Operator input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error reading input");
                    break;
                }
            };

            let flow = match Command::parse(&line) {
                Ok(command) => {
                    tracing::debug!(command = %command, "Operator command");
                    self.execute(command).await?
                }
                Err(e) => {
                    self.say(&format!("{}.", capitalize(&e.to_string()))).await?;
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                break;
            }

            // Keep the output on screen until the operator has read it.
            if self.config.clear_screen && !self.wait_for_enter().await? {
                break;
            }
        }

        Ok(())
    }

    /// Prints the continue prompt and waits for one line of input.
    ///
    /// Returns `false` when input has ended.
    async fn wait_for_enter(&mut self) -> io::Result<bool> {
        self.print(CONTINUE_PROMPT).await?;
        match self.input.next_line().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::error!(error = %e, "Error reading input");
                Ok(false)
            }
        }
    }

    /// Executes a single command.
    pub async fn execute(&mut self, command: Command) -> io::Result<ControlFlow<()>> {
        match command {
            Command::Sessions => self.print_sessions().await?,
            Command::Help => self.say(&help_text()).await?,
            Command::Use(id) => return self.use_session(id).await,
            Command::Kill(id) => self.kill_session(id).await?,
            Command::Exit => {
                self.say("Exiting.").await?;
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn print_sessions(&mut self) -> io::Result<()> {
        let sessions = self.registry.list();
        self.say(&format_sessions(&sessions, SystemTime::now())).await
    }

    async fn use_session(&mut self, id: SessionId) -> io::Result<ControlFlow<()>> {
        // Direct membership check; IDs are never reused so the session count
        // says nothing about which IDs exist.
        let Some(session) = self.registry.get(id) else {
            self.say(&format!("Session {id} doesn't exist.")).await?;
            return Ok(ControlFlow::Continue(()));
        };

        // Attach before announcing the shell so no output is dropped once
        // the operator sees it.
        let attachment = match session.attach() {
            Ok(attachment) => attachment,
            Err(e) => {
                self.say(&format!("Cannot open shell: {e}.")).await?;
                return Ok(ControlFlow::Continue(()));
            }
        };

        self.say(&format!(
            "Opened shell on session #{id} ({}). Type '{}' to return.",
            session.remote_addr(),
            bridge::EXIT_SENTINEL
        ))
        .await?;

        let detach = bridge::run(&session, attachment, &mut self.input, &mut self.output).await;

        match detach {
            Detach::OperatorExit => self.say("Closing shell..").await?,
            Detach::RemoteClosed => {
                self.say(&format!("\nSession #{id} disconnected.")).await?;
            }
            Detach::WriteFailed => {
                self.say(&format!("\nError writing to session #{id}, detached."))
                    .await?;
            }
            Detach::LocalOutputFailed => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "failed to write shell output",
                ));
            }
            Detach::InputClosed => return Ok(ControlFlow::Break(())),
        }

        Ok(ControlFlow::Continue(()))
    }

    async fn kill_session(&mut self, id: SessionId) -> io::Result<()> {
        match self.registry.remove(id).await {
            Ok(Some(info)) => {
                self.say(&format!("Killed session #{id} ({}).", info.remote_addr))
                    .await
            }
            Ok(None) => self.say(&format!("Session {id} doesn't exist.")).await,
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "Kill failed");
                self.say(&format!("Failed to kill session #{id}: {e}.")).await
            }
        }
    }

    async fn print(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            self.output.write_all(b"\n").await?;
        }
        self.output.flush().await
    }
}

/// Renders a session listing.
pub fn format_sessions(sessions: &[SessionInfo], now: SystemTime) -> String {
    if sessions.is_empty() {
        return "No sessions yet.".to_string();
    }

    let mut text = String::from("\nSessions\n---------------------------\n");
    for session in sessions {
        text.push_str(&format!(
            "Session #{}: {} (connected {})\n",
            session.id,
            session.remote_addr,
            format_relative_time(session.connected_at, now)
        ));
    }
    text.push_str(&format!("\nTotal: {} session(s)\n", sessions.len()));
    text
}

/// Format a timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: SystemTime, now: SystemTime) -> String {
    let elapsed = now
        .duration_since(timestamp)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
