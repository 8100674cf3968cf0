//! Configuration manager
//!
//! Reads and writes the JSON files under the configuration directory.
//! Files are read-modify-written without locking; a single user-driven
//! process is expected to edit them at a time.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::context::{Context, GlobalConfig};
use super::paths::{ConfigPaths, DEFAULT_CONTEXT};
use crate::error::{ConfigError, ConfigResult};

/// A context name together with the file it is loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRef {
    /// Context name
    pub name: String,
    /// Backing JSON file
    pub path: PathBuf,
}

/// Summary line for `context list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSummary {
    /// Context name
    pub name: String,
    /// Value of `last-time-used`, if any
    pub last_used: Option<String>,
}

/// Manages the configuration directory
#[derive(Debug, Clone)]
pub struct ConfigManager {
    paths: ConfigPaths,
}

impl ConfigManager {
    /// Creates a manager rooted at the directory from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration directory cannot be resolved.
    pub fn new() -> ConfigResult<Self> {
        Ok(Self {
            paths: ConfigPaths::from_env()?,
        })
    }

    /// Creates a manager rooted at a custom directory
    #[must_use]
    pub fn with_config_dir(base: PathBuf) -> Self {
        Self {
            paths: ConfigPaths::new(base),
        }
    }

    /// Paths of the managed files
    #[must_use]
    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Creates the directory layout and fills in missing global defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or `config.json` cannot be written.
    pub fn ensure_layout(&self) -> ConfigResult<()> {
        for dir in [
            self.paths.base().to_path_buf(),
            self.paths.contexts_dir(),
            self.paths.sets_dir(),
            self.paths.shared_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir, source })?;
        }

        let global_path = self.paths.global_config();
        if global_path.exists() {
            let mut global: GlobalConfig = read_json(&global_path)?;
            if global.merge_defaults() {
                write_json(&global_path, &global)?;
            }
        } else {
            write_json(&global_path, &GlobalConfig::default())?;
        }
        Ok(())
    }

    /// Loads `config.json`, falling back to defaults when it is absent
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_global(&self) -> ConfigResult<GlobalConfig> {
        let path = self.paths.global_config();
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }
        let mut global: GlobalConfig = read_json(&path)?;
        global.merge_defaults();
        Ok(global)
    }

    /// Writes `config.json`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_global(&self, global: &GlobalConfig) -> ConfigResult<()> {
        write_json(&self.paths.global_config(), global)
    }

    /// Context selected by `context use`, or `default`
    ///
    /// # Errors
    ///
    /// Returns an error if `config.json` cannot be parsed.
    pub fn used_context(&self) -> ConfigResult<String> {
        Ok(self
            .load_global()?
            .used_context
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTEXT.to_string()))
    }

    /// Selects the context used when a command names none
    ///
    /// # Errors
    ///
    /// Returns an error if the context does not exist or the global file
    /// cannot be written.
    pub fn set_used_context(&self, name: &str) -> ConfigResult<()> {
        if !self.context_exists(name) {
            return Err(ConfigError::ContextNotFound(name.to_string()));
        }
        let mut global = self.load_global()?;
        global.used_context = Some(name.to_string());
        self.save_global(&global)
    }

    /// Names of the contexts in `contexts/`, sorted
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn context_names(&self) -> ConfigResult<Vec<String>> {
        Ok(json_files(&self.paths.contexts_dir())?
            .into_iter()
            .map(|r| r.name)
            .collect())
    }

    /// Lists every context, including `default` when `creds.json` exists
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be read. Unparseable files are
    /// listed without a last-used time.
    pub fn list_contexts(&self) -> ConfigResult<Vec<ContextSummary>> {
        let mut refs = Vec::new();
        let default_path = self.paths.default_context();
        if default_path.exists() {
            refs.push(ContextRef {
                name: DEFAULT_CONTEXT.to_string(),
                path: default_path,
            });
        }
        refs.extend(json_files(&self.paths.contexts_dir())?);

        Ok(refs
            .into_iter()
            .map(|r| {
                let last_used = read_json::<Context>(&r.path)
                    .ok()
                    .and_then(|ctx| ctx.last_time_used);
                ContextSummary {
                    name: r.name,
                    last_used,
                }
            })
            .collect())
    }

    /// Returns true if a file exists for the named context
    #[must_use]
    pub fn context_exists(&self, name: &str) -> bool {
        self.paths.context_file(name).is_file()
    }

    /// Resolves a context name to its file
    #[must_use]
    pub fn context_ref(&self, name: &str) -> ContextRef {
        ContextRef {
            name: name.to_string(),
            path: self.paths.context_file(name),
        }
    }

    /// Context files of a parallel set directory (`*.json`, not hidden)
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn set_contexts(&self, dir: &Path) -> ConfigResult<Vec<ContextRef>> {
        if !dir.is_dir() {
            return Err(ConfigError::Io {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        json_files(dir)
    }

    /// Loads a context by name
    ///
    /// # Errors
    ///
    /// See [`Self::load_context_at`].
    pub fn load_context(&self, name: &str) -> ConfigResult<Context> {
        self.load_context_at(&self.context_ref(name))
    }

    /// Loads a context file, writing a sample if it does not exist
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SampleGenerated`] when a sample was written,
    /// [`ConfigError::SampleMarker`] when the file is an untouched sample,
    /// [`ConfigError::NotJson`] for a non-JSON path, or a parse error.
    pub fn load_context_at(&self, context: &ContextRef) -> ConfigResult<Context> {
        let path = &context.path;
        if path.extension().and_then(|e| e.to_str()) == Some("json") && !path.exists() {
            self.generate_sample(path)?;
            return Err(ConfigError::SampleGenerated(path.clone()));
        }
        Self::read_context_at(context)
    }

    /// Reads a context file without touching the filesystem otherwise
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ContextNotFound`] for a missing file, and the
    /// same errors as [`Self::load_context_at`] otherwise.
    pub fn read_context_at(context: &ContextRef) -> ConfigResult<Context> {
        let path = &context.path;
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(ConfigError::NotJson(path.clone()));
        }
        if !path.exists() {
            return Err(ConfigError::ContextNotFound(context.name.clone()));
        }
        let ctx: Context = read_json(path)?;
        if ctx.has_sample_marker() {
            return Err(ConfigError::SampleMarker(path.clone()));
        }
        Ok(ctx)
    }

    /// Writes a sample context file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn generate_sample(&self, path: &Path) -> ConfigResult<()> {
        tracing::warn!(path = %path.display(), "Generating sample context file");
        write_json(path, &Context::sample())
    }

    /// Stamps `last-time-used` into a context file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn mark_used(&self, context: &ContextRef) -> ConfigResult<()> {
        let mut ctx: Context = read_json(&context.path)?;
        ctx.last_time_used = Some(chrono::Utc::now().to_rfc3339());
        write_json(&context.path, &ctx)
    }
}

/// Lists `*.json` files of a directory that are not hidden, sorted by name
fn json_files(dir: &Path) -> ConfigResult<Vec<ContextRef>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut refs: Vec<ContextRef> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            if stem.starts_with('.') {
                return None;
            }
            Some(ContextRef { name: stem, path })
        })
        .collect();
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(refs)
}

/// Reads and parses a JSON file
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serializes a value as pretty JSON, creating parent directories
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = serde_json::to_string_pretty(value).map_err(ConfigError::Serialize)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
