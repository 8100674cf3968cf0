//! Error types for `Bastide`
//!
//! Configuration and session-client errors live here because every layer
//! touches them. Errors owned by a single module (tunnel, stack, lifecycle)
//! are defined next to the code that raises them and folded into
//! [`BastideError`] for callers that only want one type.

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::scheduler::StackError;
use crate::status::StatusError;
use crate::tunnel::TunnelError;

/// Errors raised while loading, validating or writing configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent from a context file
    #[error("Missing required field '{field}' in context '{context}'")]
    MissingField {
        /// Context name
        context: String,
        /// Kebab-case key name as written in the JSON file
        field: &'static str,
    },

    /// A key is present but its value cannot be used
    #[error("Invalid value for '{field}' in context '{context}': {reason}")]
    InvalidField {
        /// Context name
        context: String,
        /// Kebab-case key name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A key file referenced from configuration does not exist
    #[error("SSH key for context '{context}' not found at {}", path.display())]
    KeyNotFound {
        /// Context name
        context: String,
        /// Resolved path that was checked
        path: PathBuf,
    },

    /// No context file exists for the requested name
    #[error("No context with name '{0}'")]
    ContextNotFound(String),

    /// A sample context was written because none existed
    #[error("Sample context generated, fill out {} before continuing", .0.display())]
    SampleGenerated(PathBuf),

    /// The context file still carries the sample marker
    #[error("Remove the 'delete_this' marker from {} before continuing", .0.display())]
    SampleMarker(PathBuf),

    /// The file is not a JSON file
    #[error("Not a JSON file: {}", .0.display())]
    NotJson(PathBuf),

    /// Failed to parse a JSON document
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Underlying serde error
        source: serde_json::Error,
    },

    /// Failed to serialize a JSON document
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The home directory could not be determined
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Filesystem error
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised by a [`crate::client::SessionClient`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Request could not be formed from the given inputs
    #[error("Invalid session request: {0}")]
    InvalidConfig(String),

    /// The bastion service rejected or failed the request
    #[error("Bastion service error (status {status:?}, code {code:?}): {message}")]
    Service {
        /// HTTP status reported by the service, if any
        status: Option<u16>,
        /// Service error code, if any
        code: Option<String>,
        /// Human readable message
        message: String,
    },

    /// The reply could not be decoded into a session
    #[error("Malformed response from bastion service: {0}")]
    MalformedResponse(String),

    /// The client backend is not installed or cannot be started
    #[error("Bastion client unavailable: {0}")]
    ClientUnavailable(String),
}

impl SessionError {
    /// Returns true when the service reported that the resource is gone
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Service { status: Some(404), .. })
    }

    /// Returns true when a create attempt may be repeated
    #[must_use]
    pub const fn is_retryable_create(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::MalformedResponse(_) | Self::Service { .. }
        )
    }
}

/// Result type alias for session client operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Umbrella error for callers that do not care which layer failed
#[derive(Debug, Error)]
pub enum BastideError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session client error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Tunnel process error
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Stack maintenance error
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Lifecycle error
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Status sink error
    #[error(transparent)]
    Status(#[from] StatusError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
