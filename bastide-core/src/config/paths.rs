//! On-disk layout of the configuration directory

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BASTIDE_CONFIG_DIR";

/// Name of the directory created under the home directory
pub const DEFAULT_DIR_NAME: &str = ".bastide";

/// Reserved name of the unnamed, primary context
pub const DEFAULT_CONTEXT: &str = "default";

/// Paths of every file and directory `Bastide` reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    base: PathBuf,
}

impl ConfigPaths {
    /// Uses the given directory as the configuration root
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolves the configuration root from the environment or home directory
    ///
    /// # Errors
    ///
    /// Returns an error if neither the override variable nor a home directory
    /// is available.
    pub fn from_env() -> ConfigResult<Self> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(home.join(DEFAULT_DIR_NAME)))
    }

    /// Configuration root
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Global settings file
    #[must_use]
    pub fn global_config(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Context file of the `default` context
    #[must_use]
    pub fn default_context(&self) -> PathBuf {
        self.base.join("creds.json")
    }

    /// Directory of named contexts
    #[must_use]
    pub fn contexts_dir(&self) -> PathBuf {
        self.base.join("contexts")
    }

    /// Directory holding one sub-directory per parallel set
    #[must_use]
    pub fn sets_dir(&self) -> PathBuf {
        self.base.join("sets")
    }

    /// Directory of one named parallel set
    #[must_use]
    pub fn set_dir(&self, set_name: &str) -> PathBuf {
        self.sets_dir().join(set_name)
    }

    /// Stack file listing the contexts run by `parallel run`
    #[must_use]
    pub fn stack_file(&self) -> PathBuf {
        self.base.join("stack.json")
    }

    /// Directory backing the file status sink
    #[must_use]
    pub fn shared_dir(&self) -> PathBuf {
        self.base.join("shared_mem")
    }

    /// Resolves the file of a context by name
    #[must_use]
    pub fn context_file(&self, name: &str) -> PathBuf {
        if name == DEFAULT_CONTEXT {
            self.default_context()
        } else {
            self.contexts_dir().join(format!("{name}.json"))
        }
    }
}
