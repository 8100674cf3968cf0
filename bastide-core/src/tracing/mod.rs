//! Tracing integration for structured logging
//!
//! Installs a `tracing-subscriber` registry for the CLI and defines the span
//! and field names the lifecycle and scheduler use, so log lines from many
//! concurrent workers can be filtered by context or session id.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Global flag indicating whether tracing has been initialized
static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Global tracing configuration
static TRACING_CONFIG: OnceLock<TracingConfig> = OnceLock::new();

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to initialize tracing subscriber
    #[error("Failed to initialize tracing: {0}")]
    InitializationFailed(String),

    /// Tracing already initialized
    #[error("Tracing has already been initialized")]
    AlreadyInitialized,

    /// Failed to create log file
    #[error("Failed to create log file: {0}")]
    FileCreationFailed(String),
}

/// Result type for tracing operations
pub type TracingResult<T> = Result<T, TracingError>;

/// Tracing log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingLevel {
    /// Error level - only errors
    Error,
    /// Warn level - errors and warnings (default, keeps the live table readable)
    #[default]
    Warn,
    /// Info level - lifecycle transitions
    Info,
    /// Debug level - ssh output lines and service replies
    Debug,
    /// Trace level - all messages including trace
    Trace,
}

impl TracingLevel {
    /// Converts to tracing crate's Level
    #[must_use]
    pub const fn to_tracing_level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Info => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Maps a `-v` count to a level
    #[must_use]
    pub const fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl std::str::FromStr for TracingLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TracingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Output destination for tracing logs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// Output to stdout
    Stdout,
    /// Output to stderr
    #[default]
    Stderr,
    /// Output to a file (truncated on start)
    File(PathBuf),
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Log level
    pub level: TracingLevel,
    /// Output destination
    pub output: TracingOutput,
    /// Whether to include thread ids (useful with many workers)
    pub thread_ids: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
}

impl TracingConfig {
    /// Creates a new tracing configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level
    #[must_use]
    pub const fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output destination
    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Enables or disables thread ids in log lines
    #[must_use]
    pub const fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Sets a custom filter string
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Builds the env filter for this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a custom filter string does not parse.
    pub fn env_filter(&self) -> TracingResult<EnvFilter> {
        if let Some(ref custom_filter) = self.filter {
            return EnvFilter::try_new(custom_filter)
                .map_err(|e| TracingError::InitializationFailed(e.to_string()));
        }
        Ok(
            EnvFilter::try_new(format!("bastide_core={0},bastide={0}", self.level))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
    }
}

/// Initializes the tracing subscriber with the given configuration
///
/// This function should be called once at application startup.
/// Subsequent calls will return an error.
///
/// # Errors
///
/// Returns an error if:
/// - Tracing has already been initialized
/// - The subscriber fails to initialize
/// - File output is configured but the file cannot be created
pub fn init_tracing(config: &TracingConfig) -> TracingResult<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(TracingError::AlreadyInitialized);
    }

    let _ = TRACING_CONFIG.set(config.clone());
    let filter = config.env_filter()?;

    match &config.output {
        TracingOutput::Stdout => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(config.thread_ids)
                    .with_writer(std::io::stdout),
            )
            .try_init()
            .map_err(|e| TracingError::InitializationFailed(e.to_string()))?,
        TracingOutput::Stderr => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(config.thread_ids)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| TracingError::InitializationFailed(e.to_string()))?,
        TracingOutput::File(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| TracingError::FileCreationFailed(e.to_string()))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_thread_ids(config.thread_ids)
                        .with_ansi(false)
                        .with_writer(file),
                )
                .try_init()
                .map_err(|e| TracingError::InitializationFailed(e.to_string()))?;
        }
    }

    tracing::debug!(level = %config.level, "Tracing initialized");
    Ok(())
}

/// Checks if tracing has been initialized
#[must_use]
pub fn is_tracing_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::SeqCst)
}

/// Gets the current tracing configuration (if initialized)
#[must_use]
pub fn get_tracing_config() -> Option<&'static TracingConfig> {
    TRACING_CONFIG.get()
}

/// Standard span names
pub mod span_names {
    /// One incarnation of a session lifecycle
    pub const LIFECYCLE_RUN: &str = "lifecycle.run";
    /// One scheduled worker
    pub const SCHEDULER_WORKER: &str = "scheduler.worker";
    /// Shutdown fan-out
    pub const SHUTDOWN_KILL_ALL: &str = "shutdown.kill_all";
}

/// Standard field names
pub mod field_names {
    /// Context name field
    pub const CONTEXT: &str = "context";
    /// Remote session id field
    pub const SESSION_ID: &str = "session_id";
    /// Region field
    pub const REGION: &str = "region";
    /// Attempt counter field
    pub const ATTEMPT: &str = "attempt";
    /// Subprocess exit code field
    pub const EXIT_CODE: &str = "exit_code";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level_from_str() {
        assert_eq!("error".parse::<TracingLevel>(), Ok(TracingLevel::Error));
        assert_eq!("WARN".parse::<TracingLevel>(), Ok(TracingLevel::Warn));
        assert_eq!("Info".parse::<TracingLevel>(), Ok(TracingLevel::Info));
        assert_eq!("debug".parse::<TracingLevel>(), Ok(TracingLevel::Debug));
        assert!("loud".parse::<TracingLevel>().is_err());
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingLevel::from_verbosity(0), TracingLevel::Warn);
        assert_eq!(TracingLevel::from_verbosity(1), TracingLevel::Info);
        assert_eq!(TracingLevel::from_verbosity(2), TracingLevel::Debug);
        assert_eq!(TracingLevel::from_verbosity(9), TracingLevel::Trace);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new()
            .with_level(TracingLevel::Debug)
            .with_output(TracingOutput::Stdout)
            .with_thread_ids(true)
            .with_filter("bastide_core=trace");

        assert_eq!(config.level, TracingLevel::Debug);
        assert_eq!(config.output, TracingOutput::Stdout);
        assert!(config.thread_ids);
        assert_eq!(config.filter.as_deref(), Some("bastide_core=trace"));
    }

    #[test]
    fn test_invalid_custom_filter_is_rejected() {
        let config = TracingConfig::new().with_filter("bastide_core=[");
        assert!(config.env_filter().is_err());
    }
}
