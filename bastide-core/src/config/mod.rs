//! Configuration management for `Bastide`
//!
//! This module provides the `ConfigManager` for the JSON files under the
//! configuration directory and the typed context model.

pub mod context;
mod manager;
pub mod paths;

pub use context::{
    Context, GlobalConfig, LenientNumber, ManagedTarget, PortForwardTarget, expand_path,
    private_from_public,
};
pub use manager::{ConfigManager, ContextRef, ContextSummary, read_json, write_json};
pub use paths::{CONFIG_DIR_ENV, ConfigPaths, DEFAULT_CONTEXT};
