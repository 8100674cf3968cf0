//! Tunnel subprocess supervision
//!
//! A [`TunnelHandle`] runs one ssh process at a time, classifies its merged
//! stdout/stderr line by line as it arrives and turns the exit into a
//! [`TunnelExit`]. The launcher is a trait so tests can script the process.

use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use super::TunnelError;
use super::command::TunnelCommand;
use crate::retry::AuthBudget;
use crate::shutdown::StopSignal;

/// Exit code ssh uses for connection and authorization failures
pub const AUTH_FAILURE_EXIT_CODE: i32 = 255;

/// Line printed by `ssh -vvv` once the tunnel is established
const CONNECTED_MARKER: &str = "pledge:";

/// Line printed when the bastion rejects the key
const DENIED_MARKER: &str = "Permission denied";

/// Status line set once the connected marker is seen
pub const STATUS_CONNECTED: &str = "connected";

/// Classification of one output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// The tunnel is established
    Connected,
    /// The server refused the key
    AuthDenied,
    /// Anything else
    Other,
}

/// Classifies one line of ssh output
#[must_use]
pub fn classify_line(line: &str) -> LineClass {
    if line.contains(DENIED_MARKER) {
        LineClass::AuthDenied
    } else if line.contains(CONNECTED_MARKER) {
        LineClass::Connected
    } else {
        LineClass::Other
    }
}

/// How one tunnel run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelExit {
    /// The process exited with code 0
    UserTerminated,
    /// The process exited for another reason
    Disconnected {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Whether the connected marker was seen during this run
        was_connected: bool,
    },
    /// The process exited with the authorization failure code
    AuthFailed {
        /// Failures still tolerated
        remaining: u32,
    },
    /// A "Permission denied" line was seen and the process was killed
    PermissionDenied {
        /// Failures still tolerated
        remaining: u32,
    },
    /// The program could not be started
    SpawnFailed(String),
    /// A stop was requested and the process was killed
    Cancelled,
}

impl TunnelExit {
    /// Returns true if the tunnel was up at some point during the run
    #[must_use]
    pub const fn was_connected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                was_connected: true,
                ..
            }
        )
    }
}

/// A running tunnel process
#[async_trait]
pub trait TunnelChild: Send {
    /// Next line of merged output, `None` once both streams are closed
    async fn next_line(&mut self) -> Option<String>;

    /// Waits for the process to exit, returning its exit code
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Kills the process and reaps it
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts tunnel processes
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    /// Spawns `command`
    async fn spawn(&self, command: &TunnelCommand) -> std::io::Result<Box<dyn TunnelChild>>;
}

/// Launches real processes with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher {
    shell: bool,
}

impl SystemLauncher {
    /// Creates a launcher; `shell` runs commands through the system shell
    #[must_use]
    pub const fn new(shell: bool) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl TunnelLauncher for SystemLauncher {
    async fn spawn(&self, command: &TunnelCommand) -> std::io::Result<Box<dyn TunnelChild>> {
        tracing::info!(
            command = %command.to_shell_string(),
            shell = self.shell,
            "Running ssh command"
        );
        let mut child = command.to_command(self.shell).spawn()?;

        let lines = if command.is_interactive() {
            None
        } else {
            let (tx, rx) = mpsc::channel(64);
            if let Some(stdout) = child.stdout.take() {
                forward_lines(stdout, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(stderr, tx);
            }
            Some(rx)
        };
        Ok(Box::new(SystemChild { child, lines }))
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

struct SystemChild {
    child: tokio::process::Child,
    lines: Option<mpsc::Receiver<String>>,
}

#[async_trait]
impl TunnelChild for SystemChild {
    async fn next_line(&mut self) -> Option<String> {
        match self.lines.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        self.child.wait().await.map(|status: ExitStatus| status.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

/// One lifecycle's tunnel state: connected flag, auth budget, last status
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    name: String,
    budget: AuthBudget,
    connected: bool,
    last_status: String,
}

impl TunnelHandle {
    /// Creates a handle with a full budget
    #[must_use]
    pub fn new(name: impl Into<String>, budget: AuthBudget) -> Self {
        Self {
            name: name.into(),
            budget,
            connected: false,
            last_status: String::new(),
        }
    }

    /// Whether the current run has seen the connected marker
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Authorization failures still tolerated
    #[must_use]
    pub const fn budget(&self) -> AuthBudget {
        self.budget
    }

    /// Last status line set by the handle
    #[must_use]
    pub fn last_status(&self) -> &str {
        &self.last_status
    }

    /// Runs `command` once until it exits or `stop` fires
    ///
    /// `on_status` receives every status line change.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::AuthExhausted`] when the authorization budget
    /// runs out.
    pub async fn run(
        &mut self,
        launcher: &dyn TunnelLauncher,
        command: &TunnelCommand,
        stop: &StopSignal,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<TunnelExit, TunnelError> {
        self.connected = false;
        self.last_status.clear();
        let mut child = match launcher.spawn(command).await {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    context = %self.name,
                    program = command.program(),
                    error = %e,
                    "Failed to start ssh, try again with --shell"
                );
                return Ok(TunnelExit::SpawnFailed(e.to_string()));
            }
        };

        loop {
            tokio::select! {
                () = stop.cancelled() => return Ok(self.cancel(child.as_mut()).await),
                line = child.next_line() => {
                    let Some(line) = line else { break };
                    tracing::debug!(context = %self.name, "ssh: {line}");
                    match classify_line(&line) {
                        LineClass::Connected => {
                            if !self.connected {
                                tracing::info!(context = %self.name, "SSH tunnel running");
                            }
                            self.connected = true;
                            self.budget.reset();
                            self.set_status(STATUS_CONNECTED, on_status);
                        }
                        LineClass::AuthDenied => {
                            tracing::warn!(context = %self.name, "Bastion refused the key");
                            if let Err(e) = child.kill().await {
                                tracing::debug!(context = %self.name, error = %e, "Kill failed");
                            }
                            self.connected = false;
                            let remaining = self.consume_auth(on_status)?;
                            return Ok(TunnelExit::PermissionDenied { remaining });
                        }
                        LineClass::Other => {}
                    }
                }
            }
        }

        let code = tokio::select! {
            () = stop.cancelled() => return Ok(self.cancel(child.as_mut()).await),
            status = child.wait() => match status {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(context = %self.name, error = %e, "Lost track of ssh process");
                    None
                }
            },
        };
        let was_connected = self.connected;
        self.connected = false;
        tracing::debug!(context = %self.name, exit_code = ?code, "SSH tunnel process ended");

        match code {
            Some(0) => Ok(TunnelExit::UserTerminated),
            Some(AUTH_FAILURE_EXIT_CODE) if !was_connected => {
                tracing::warn!(
                    context = %self.name,
                    "SSH tunnel can not be initialized because of failed authorization"
                );
                let remaining = self.consume_auth(on_status)?;
                Ok(TunnelExit::AuthFailed { remaining })
            }
            code => Ok(TunnelExit::Disconnected {
                code,
                was_connected,
            }),
        }
    }

    /// Charges one authorization failure against the budget
    fn consume_auth(
        &mut self,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<u32, TunnelError> {
        let remaining = self.budget.consume();
        if remaining == 0 {
            self.set_status("failed", on_status);
            return Err(TunnelError::AuthExhausted {
                attempts: self.budget.budget(),
            });
        }
        self.set_status(&format!("failed {remaining} left"), on_status);
        Ok(remaining)
    }

    async fn cancel(&mut self, child: &mut dyn TunnelChild) -> TunnelExit {
        tracing::debug!(context = %self.name, "Stopping ssh tunnel");
        if let Err(e) = child.kill().await {
            tracing::debug!(context = %self.name, error = %e, "Kill failed");
        }
        self.connected = false;
        TunnelExit::Cancelled
    }

    fn set_status(&mut self, status: &str, on_status: &(dyn Fn(&str) + Send + Sync)) {
        if self.last_status != status {
            self.last_status = status.to_string();
            on_status(status);
        }
    }
}
