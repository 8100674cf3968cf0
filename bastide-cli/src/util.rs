//! Shared utility functions used across command modules.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use bastide_core::config::ContextRef;
use bastide_core::{
    ConfigManager, FileStatusSink, LifecycleDeps, OciCliClient, ShutdownContext, SystemLauncher,
};

use crate::error::CliError;

/// Creates a `ConfigManager` using the optional custom config directory
/// from CLI args, and makes sure its layout exists.
pub fn create_config_manager(config_path: Option<&Path>) -> Result<ConfigManager, CliError> {
    let manager = match config_path {
        Some(path) => ConfigManager::with_config_dir(path.to_path_buf()),
        None => ConfigManager::new()
            .map_err(|e| CliError::Config(format!("Failed to initialize config: {e}")))?,
    };
    manager.ensure_layout()?;
    Ok(manager)
}

/// Resolves an optional context name, falling back to the used context
pub fn resolve_context(config: &ConfigManager, name: Option<&str>) -> Result<ContextRef, CliError> {
    let name = match name {
        Some(name) => name.to_string(),
        None => config.used_context()?,
    };
    Ok(config.context_ref(&name))
}

/// Status store shared with other `bastide` processes
pub fn status_sink(config: &ConfigManager) -> FileStatusSink {
    FileStatusSink::new(config.paths().shared_dir())
}

/// Collaborators backed by the `oci` and `ssh` binaries
pub fn lifecycle_deps(config: &ConfigManager, shell: bool) -> LifecycleDeps {
    LifecycleDeps {
        client: Arc::new(OciCliClient::new()),
        launcher: Arc::new(SystemLauncher::new(shell)),
        sink: Arc::new(status_sink(config)),
        shutdown: ShutdownContext::new(),
    }
}

/// Creates the runtime async commands block on
pub fn create_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(|e| CliError::Runtime(e.to_string()))
}

/// Asks a yes/no question on stdin, defaulting to no
pub fn confirm(prompt: &str) -> Result<bool, CliError> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
