//! Persisted stack of contexts and parallel sets
//!
//! The stack lives in `stack.json` as `{"stack": [...]}`. A parallel set is
//! a directory under `sets/` holding one context file per member.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{StackError, StackResult};
use crate::config::{ConfigManager, ContextRef, DEFAULT_CONTEXT, read_json, write_json};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StackFile {
    #[serde(default)]
    stack: Vec<String>,
}

/// Named contexts run together by `parallel run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    path: PathBuf,
    members: BTreeSet<String>,
}

impl Stack {
    /// Loads `stack.json`, creating an empty one if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load(config: &ConfigManager) -> StackResult<Self> {
        let path = config.paths().stack_file();
        let file = if path.exists() {
            read_json::<StackFile>(&path)?
        } else {
            let file = StackFile::default();
            write_json(&path, &file)?;
            file
        };
        Ok(Self {
            path,
            members: file.stack.into_iter().collect(),
        })
    }

    /// Member names, sorted
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Returns true if `name` is a member
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the stack has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds a context to the stack and saves it
    ///
    /// The stack is left unchanged when the context is already a member, does
    /// not exist, or forwards the same local port as an existing member.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::AlreadyPresent`], [`StackError::UnknownContext`],
    /// [`StackError::PortCollision`], or a configuration error.
    pub fn add(&mut self, config: &ConfigManager, name: &str) -> StackResult<()> {
        if self.contains(name) {
            return Err(StackError::AlreadyPresent(name.to_string()));
        }
        if name != DEFAULT_CONTEXT && !config.context_exists(name) {
            return Err(StackError::UnknownContext(name.to_string()));
        }

        let port = config.load_context(name)?.local_port(name)?;
        if let Some(owner) = self.port_owner(config, port, name) {
            return Err(StackError::PortCollision { port, owner });
        }

        self.members.insert(name.to_string());
        self.save()?;
        tracing::info!(context = name, local_port = port, "Added context to stack");
        Ok(())
    }

    /// Removes a context from the stack
    ///
    /// Returns `false`, with a warning, when it was not a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack file cannot be written.
    pub fn remove(&mut self, name: &str) -> StackResult<bool> {
        if !self.members.remove(name) {
            tracing::warn!(context = name, "No context by that name in stack");
            return Ok(false);
        }
        self.save()?;
        tracing::info!(context = name, "Removed context from stack");
        Ok(true)
    }

    /// Member that already forwards `port`, ignoring `candidate` itself
    ///
    /// Members whose file cannot be read are skipped.
    #[must_use]
    pub fn port_owner(&self, config: &ConfigManager, port: u16, candidate: &str) -> Option<String> {
        self.members
            .iter()
            .filter(|member| member.as_str() != candidate)
            .find(|member| {
                match ConfigManager::read_context_at(&config.context_ref(member))
                    .and_then(|ctx| ctx.local_port(member))
                {
                    Ok(member_port) => member_port == port,
                    Err(e) => {
                        tracing::debug!(
                            context = %member,
                            error = %e,
                            "Skipping unreadable member"
                        );
                        false
                    }
                }
            })
            .cloned()
    }

    /// Context files of every member
    #[must_use]
    pub fn context_refs(&self, config: &ConfigManager) -> Vec<ContextRef> {
        self.members.iter().map(|m| config.context_ref(m)).collect()
    }

    fn save(&self) -> StackResult<()> {
        let file = StackFile {
            stack: self.members.iter().cloned().collect(),
        };
        write_json(&self.path, &file)?;
        Ok(())
    }
}

/// Creates an empty parallel set directory
///
/// # Errors
///
/// Returns [`StackError::SetExists`] if it already exists, or an I/O error.
pub fn create_set(config: &ConfigManager, name: &str) -> StackResult<PathBuf> {
    let dir = config.paths().set_dir(name);
    if dir.exists() {
        return Err(StackError::SetExists(name.to_string()));
    }
    std::fs::create_dir_all(&dir).map_err(|source| StackError::Io {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Lists parallel sets with their member names
///
/// # Errors
///
/// Returns an error if a set directory cannot be read.
pub fn list_sets(config: &ConfigManager) -> StackResult<Vec<(String, Vec<String>)>> {
    let sets_dir = config.paths().sets_dir();
    if !sets_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(&sets_dir).map_err(|source| StackError::Io {
        path: sets_dir.clone(),
        source,
    })?;

    let mut sets = Vec::new();
    for path in entries.filter_map(Result::ok).map(|e| e.path()) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        let members = config
            .set_contexts(&path)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        sets.push((name.to_string(), members));
    }
    sets.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(sets)
}

/// Resolves a set name to its directory, rejecting missing or empty sets
///
/// # Errors
///
/// Returns [`StackError::SetNotFound`] or [`StackError::EmptySet`].
pub fn resolve_set(config: &ConfigManager, name: &str) -> StackResult<PathBuf> {
    let dir = config.paths().set_dir(name);
    if !dir.is_dir() {
        return Err(StackError::SetNotFound {
            name: name.to_string(),
            path: dir,
        });
    }
    ensure_non_empty(config, &dir)?;
    Ok(dir)
}

/// Fails when a set directory holds no context file
///
/// # Errors
///
/// Returns [`StackError::EmptySet`] or a configuration error.
pub fn ensure_non_empty(config: &ConfigManager, dir: &Path) -> StackResult<Vec<ContextRef>> {
    let contexts = config.set_contexts(dir)?;
    if contexts.is_empty() {
        return Err(StackError::EmptySet(dir.to_path_buf()));
    }
    Ok(contexts)
}
