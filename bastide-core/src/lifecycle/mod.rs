//! Session lifecycle state machine
//!
//! One [`SessionLifecycle`] drives a single context through
//! `Idle → CreatingSession → WaitingActive → TunnelUp ⇄ Reconnecting →
//! Terminated`. Cleanup (remote deletion, status removal) runs on every exit
//! path. Restarting after `Terminated` is the caller's job, see
//! [`run_fullauto`].

mod decision;
mod fullauto;
mod machine;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{ConfigError, SessionError};
use crate::tunnel::TunnelError;

pub use decision::{ReconnectDecision, decide_reconnect};
pub use fullauto::run_fullauto;
pub use machine::{LifecycleDeps, SessionLifecycle};

/// Tunnel attempts per reconnect cycle before the TTL is evaluated
pub const ATTEMPTS_PER_CYCLE: u32 = 3;

/// Exit code for configuration and creation failures
pub const EXIT_CONFIG: i32 = 1;

/// Exit code for exhausted SSH authorization
pub const EXIT_AUTH_EXHAUSTED: i32 = 255;

/// Phase of a lifecycle run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    /// Not started
    #[default]
    Idle,
    /// Creating the remote session
    CreatingSession,
    /// Polling until the session is active
    WaitingActive,
    /// Tunnel process running
    TunnelUp,
    /// Tunnel exited, deciding what to do
    Reconnecting,
    /// Finished and cleaned up
    Terminated,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CreatingSession => "creating session",
            Self::WaitingActive => "waiting active",
            Self::TunnelUp => "tunnel up",
            Self::Reconnecting => "reconnecting",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Kind of bastion session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionKind {
    /// Local port forward to an IP and port
    #[default]
    PortForward,
    /// Interactive login to a managed resource
    ManagedSsh,
}

/// Why a lifecycle run ended without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The tunnel process exited with code 0
    UserTerminated,
    /// The remote session is no longer active
    SessionDeleted,
    /// The remote session outlived its TTL
    TtlExpired,
    /// A stop was requested
    Stopped,
    /// The session did not become active within the configured timeout
    ActivationTimedOut,
    /// The tunnel program could not be started
    SpawnFailed(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserTerminated => write!(f, "terminated by user"),
            Self::SessionDeleted => write!(f, "bastion session deleted"),
            Self::TtlExpired => write!(f, "session ttl expired"),
            Self::Stopped => write!(f, "stopped"),
            Self::ActivationTimedOut => write!(f, "session activation timed out"),
            Self::SpawnFailed(reason) => write!(f, "ssh could not be started: {reason}"),
        }
    }
}

/// Errors ending a lifecycle run
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The context could not be loaded or is incomplete
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session creation kept failing
    #[error("Failed to create bastion session after {attempts} attempts: {last}")]
    CreateExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        last: SessionError,
    },

    /// The tunnel's authorization budget is exhausted
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The session service failed outside of creation
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl LifecycleError {
    /// Process exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Tunnel(TunnelError::AuthExhausted { .. }) => EXIT_AUTH_EXHAUSTED,
            Self::Config(_) | Self::CreateExhausted { .. } | Self::Session(_) => EXIT_CONFIG,
        }
    }

    /// Returns true if restarting the lifecycle cannot help
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::CreateExhausted { .. } | Self::Tunnel(_) => true,
            Self::Session(e) => matches!(e, SessionError::ClientUnavailable(_)),
        }
    }
}

/// Result type alias for lifecycle operations
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Pauses used by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// Interval between activation polls
    pub poll_interval: Duration,
    /// Pause between activation and the first tunnel
    pub settle_delay: Duration,
    /// Pause before relaunching a tunnel
    pub retry_pause: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
            retry_pause: Duration::from_secs(1),
        }
    }
}

impl LifecycleTimings {
    /// Uses the same duration for every pause
    #[must_use]
    pub const fn uniform(pause: Duration) -> Self {
        Self {
            poll_interval: pause,
            settle_delay: pause,
            retry_pause: pause,
        }
    }
}

/// Live view of a lifecycle, published through a watch channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// Current phase
    pub phase: LifecyclePhase,
    /// Last status line
    pub status: String,
    /// Whether the tunnel is up right now
    pub connected: bool,
    /// Remote session of the current run
    pub session_id: Option<String>,
    /// Region of the current run
    pub region: Option<String>,
    /// Tunnel runs that reached the connected marker in the current run
    pub tunnels_up: u32,
}
