//! Attach command - SSH into a running port forward.

use std::collections::BTreeMap;
use std::path::Path;

use bastide_core::{StatusRecord, StatusSink, TunnelCommand};

use crate::error::CliError;
use crate::util::{create_config_manager, create_runtime, status_sink};

/// Attach command handler
pub fn cmd_attach(
    config_path: Option<&Path>,
    port: Option<&str>,
    name: Option<&str>,
) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let records = status_sink(&config).list_all()?;

    let (context, record) = select_record(records, port, name)?;
    let Some(local_port) = record.port else {
        return Err(CliError::Attach(format!("{context} has no local port recorded")));
    };
    let Some(username) = record.username else {
        return Err(CliError::Attach(format!(
            "{context} has no username recorded, set resource-os-username in its context file"
        )));
    };

    let command = TunnelCommand::attach(&username, local_port);
    println!("Running SSH to {context} {username}@localhost:{local_port}");
    tracing::debug!(command = %command.to_shell_string(), "Attaching");

    let runtime = create_runtime()?;
    let status = runtime.block_on(async { command.to_command(false).status().await })?;
    if !status.success() {
        tracing::info!(exit_code = ?status.code(), "ssh exited");
    }
    Ok(())
}

/// Picks the single record matching the name or port substring
fn select_record(
    records: BTreeMap<String, StatusRecord>,
    port: Option<&str>,
    name: Option<&str>,
) -> Result<(String, StatusRecord), CliError> {
    if records.is_empty() {
        return Err(CliError::Attach("No running contexts".to_string()));
    }

    let mut matches: Vec<(String, StatusRecord)> = records
        .into_iter()
        .filter(|(key, record)| match (name, port) {
            (Some(name), _) => key.contains(name),
            (None, Some(port)) => record
                .port
                .is_some_and(|p| p.to_string().contains(port)),
            (None, None) => true,
        })
        .collect();

    match matches.len() {
        0 => Err(CliError::Attach(format!(
            "No running context matches {}",
            name.or(port).unwrap_or_default()
        ))),
        1 => Ok(matches.remove(0)),
        _ => {
            let names: Vec<_> = matches.iter().map(|(key, _)| key.as_str()).collect();
            Err(CliError::Attach(format!(
                "Several running contexts match: {}",
                names.join(", ")
            )))
        }
    }
}
