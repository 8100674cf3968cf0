//! Shared status records
//!
//! Every running context publishes its status, local port and OS user so a
//! separate `attach` or `status` process can find it. Updates are partial:
//! fields present in an update replace the stored ones, absent fields are
//! kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name prefix of the file sink records
pub const DEFAULT_SINK_PREFIX: &str = "bastide_status";

/// Errors raised by a status sink
#[derive(Debug, Error)]
pub enum StatusError {
    /// Filesystem error
    #[error("Status store IO error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A record could not be decoded or encoded
    #[error("Corrupt status record {}: {source}", path.display())]
    Json {
        /// Record path
        path: PathBuf,
        /// Underlying serde error
        source: serde_json::Error,
    },
}

/// Result type alias for status sink operations
pub type StatusResult<T> = std::result::Result<T, StatusError>;

/// Status of one context, also used as a partial update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Region the session lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Last lifecycle status line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Local port of the tunnel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// OS user for `attach`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl StatusRecord {
    /// Update carrying only a status line
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    /// Sets the region
    #[must_use]
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Sets the local port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the OS user
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Overlays the fields present in `update`
    pub fn merge(&mut self, update: &Self) {
        if update.region.is_some() {
            self.region.clone_from(&update.region);
        }
        if update.status.is_some() {
            self.status.clone_from(&update.status);
        }
        if update.port.is_some() {
            self.port = update.port;
        }
        if update.username.is_some() {
            self.username.clone_from(&update.username);
        }
    }
}

/// Multi-reader key/value store of [`StatusRecord`]s keyed by context name
pub trait StatusSink: Send + Sync {
    /// Merges `update` into the record stored under `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn publish(&self, key: &str, update: &StatusRecord) -> StatusResult<()>;

    /// Removes the record stored under `key`; a missing record is fine
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove(&self, key: &str) -> StatusResult<()>;

    /// Returns every stored record
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_all(&self) -> StatusResult<BTreeMap<String, StatusRecord>>;
}

/// One JSON file per context in a shared directory
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    dir: PathBuf,
    prefix: String,
}

impl FileStatusSink {
    /// Creates a sink storing records in `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_SINK_PREFIX.to_string(),
        }
    }

    /// Uses a different file name prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Directory of the records
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_{key}.json", self.prefix))
    }

    fn read_record(path: &Path) -> StatusResult<StatusRecord> {
        let content = std::fs::read_to_string(path).map_err(|source| StatusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StatusError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl StatusSink for FileStatusSink {
    fn publish(&self, key: &str, update: &StatusRecord) -> StatusResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StatusError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.record_path(key);
        // A corrupt record is replaced rather than blocking the publisher.
        let mut record = Self::read_record(&path).unwrap_or_default();
        record.merge(update);

        let content = serde_json::to_string_pretty(&record).map_err(|source| StatusError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| StatusError::Io { path, source })
    }

    fn remove(&self, key: &str) -> StatusResult<()> {
        let path = self.record_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StatusError::Io { path, source }),
        }
    }

    fn list_all(&self) -> StatusResult<BTreeMap<String, StatusRecord>> {
        let mut records = BTreeMap::new();
        if !self.dir.exists() {
            return Ok(records);
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StatusError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let marker = format!("{}_", self.prefix);

        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(&marker))
                .and_then(|n| n.strip_suffix(".json"))
                .map(ToString::to_string)
            else {
                continue;
            };
            match Self::read_record(&path) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(e) => tracing::debug!(error = %e, "Skipping unreadable status record"),
            }
        }
        Ok(records)
    }
}

/// In-process sink
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    records: Mutex<BTreeMap<String, StatusRecord>>,
}

impl MemoryStatusSink {
    /// Creates an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StatusRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl StatusSink for MemoryStatusSink {
    fn publish(&self, key: &str, update: &StatusRecord) -> StatusResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .merge(update);
        Ok(())
    }

    fn remove(&self, key: &str) -> StatusResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn list_all(&self) -> StatusResult<BTreeMap<String, StatusRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_overlays_present_fields() {
        let mut record = StatusRecord::status("digging tunnel")
            .with_port(2222)
            .with_username(Some("opc".to_string()));
        record.merge(&StatusRecord::status("connected"));

        assert_eq!(record.status.as_deref(), Some("connected"));
        assert_eq!(record.port, Some(2222));
        assert_eq!(record.username.as_deref(), Some("opc"));
    }

    #[test]
    fn test_file_sink_round_trip() {
        let dir = TempDir::new().unwrap();
        let sink = FileStatusSink::new(dir.path());

        sink.publish("db", &StatusRecord::default().with_port(15432))
            .unwrap();
        sink.publish("db", &StatusRecord::status("connected")).unwrap();
        sink.publish("web", &StatusRecord::status("waiting for session init"))
            .unwrap();

        let all = sink.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["db"].port, Some(15432));
        assert_eq!(all["db"].status.as_deref(), Some("connected"));

        sink.remove("db").unwrap();
        sink.remove("db").unwrap();
        assert!(!sink.list_all().unwrap().contains_key("db"));
    }

    #[test]
    fn test_file_sink_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let sink = FileStatusSink::new(dir.path());
        assert!(sink.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_memory_sink_remove() {
        let sink = MemoryStatusSink::new();
        sink.publish("foo", &StatusRecord::status("connected")).unwrap();
        assert!(sink.get("foo").is_some());
        sink.remove("foo").unwrap();
        assert!(sink.get("foo").is_none());
    }
}
