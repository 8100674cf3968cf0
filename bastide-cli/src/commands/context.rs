//! Context commands - list, show, select and generate context files.

use std::path::Path;

use bastide_core::config::read_json;
use serde_json::Value;

use crate::error::CliError;
use crate::util::create_config_manager;

/// Keys never printed by `context show`
const HIDDEN_KEYS: &[&str] = &["private-key-path", "ssh-pub-path"];

/// List command handler
pub fn cmd_list(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let contexts = config.list_contexts()?;
    let used = config.used_context()?;

    if contexts.is_empty() {
        println!("No contexts found in {}", config.paths().base().display());
        return Ok(());
    }

    let name_width = contexts
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(4)
        .max(4)
        + 2;

    println!("{:<name_width$} LAST USED", "NAME");
    println!("{:-<name_width$} {:-<25}", "", "");
    for context in &contexts {
        let marker = if context.name == used { "* " } else { "  " };
        println!(
            "{marker}{:<width$} {}",
            context.name,
            context.last_used.as_deref().unwrap_or("never"),
            width = name_width - 2
        );
    }
    Ok(())
}

/// Show command handler
pub fn cmd_show(config_path: Option<&Path>, name: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    if !config.context_exists(name) {
        return Err(CliError::ContextNotFound(name.to_string()));
    }

    let mut content: Value = read_json(&config.context_ref(name).path)?;
    if let Some(map) = content.as_object_mut() {
        for key in HIDDEN_KEYS {
            map.remove(*key);
        }
    }

    let rendered = serde_json::to_string_pretty(&content)
        .map_err(|e| CliError::Config(format!("Failed to render context: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// Use command handler
pub fn cmd_use(config_path: Option<&Path>, name: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    config.set_used_context(name)?;
    println!("Using context {name}");
    Ok(())
}

/// Generate command handler
pub fn cmd_generate(config_path: Option<&Path>, name: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let context = config.context_ref(name);
    if context.path.exists() {
        return Err(CliError::Config(format!(
            "Context {name} already exists at {}",
            context.path.display()
        )));
    }

    config.generate_sample(&context.path)?;
    println!("Sample context written to {}", context.path.display());
    println!("Fill it out and remove the \"delete_this\" key before use");
    Ok(())
}
