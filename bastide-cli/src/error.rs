//! CLI error types and exit codes.

use bastide_core::{ConfigError, LifecycleError, StackError, StatusError};

/// Exit codes for CLI operations
pub mod exit_codes {
    /// General error - configuration, validation, or other non-tunnel errors
    pub const GENERAL_ERROR: i32 = 1;
    /// The tunnel kept failing authorization
    pub const AUTH_EXHAUSTED: i32 = 255;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Context not found
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    /// Stack or parallel set error
    #[error("Parallel error: {0}")]
    Parallel(String),

    /// A lifecycle ended on a fatal error
    #[error("{message}")]
    Lifecycle {
        /// Rendered lifecycle error
        message: String,
        /// Exit code mapped from the lifecycle error
        code: i32,
    },

    /// No running tunnel matches the attach query
    #[error("Attach error: {0}")]
    Attach(String),

    /// Status store error
    #[error("Status error: {0}")]
    Status(String),

    /// The async runtime could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ContextNotFound(name) => Self::ContextNotFound(name),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<StackError> for CliError {
    fn from(err: StackError) -> Self {
        match err {
            StackError::Config(e) => e.into(),
            other => Self::Parallel(other.to_string()),
        }
    }
}

impl From<LifecycleError> for CliError {
    fn from(err: LifecycleError) -> Self {
        Self::Lifecycle {
            code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

impl From<StatusError> for CliError {
    fn from(err: StatusError) -> Self {
        Self::Status(err.to_string())
    }
}

impl CliError {
    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit codes:
    /// - 0: Success (not an error)
    /// - 1: Configuration, validation, session creation, IO
    /// - 255: Authorization retry budget exhausted
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Lifecycle { code, .. } => *code,
            Self::Config(_)
            | Self::ContextNotFound(_)
            | Self::Parallel(_)
            | Self::Attach(_)
            | Self::Status(_)
            | Self::Runtime(_)
            | Self::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }
}
