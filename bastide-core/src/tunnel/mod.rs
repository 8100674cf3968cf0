//! SSH tunnel processes
//!
//! [`TunnelCommand`] builds the ssh command line for each session kind and
//! [`TunnelHandle`] supervises one process at a time.

pub mod command;
pub mod process;

use thiserror::Error;

pub use command::TunnelCommand;
pub use process::{
    AUTH_FAILURE_EXIT_CODE, LineClass, STATUS_CONNECTED, SystemLauncher, TunnelChild, TunnelExit,
    TunnelHandle, TunnelLauncher, classify_line,
};

/// Hint printed when authorization keeps failing
pub const KNOWN_HOSTS_HINT: &str = "If this keeps happening without a connection, the target ip \
     may have changed in ~/.ssh/known_hosts; delete the stale entry and try again";

/// Errors raised while supervising a tunnel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// Every tolerated authorization failure has been used up
    #[error("SSH authorization failed {attempts} times in a row")]
    AuthExhausted {
        /// Size of the budget that was exhausted
        attempts: u32,
    },
}

/// Result type alias for tunnel operations
pub type TunnelResult<T> = std::result::Result<T, TunnelError>;
