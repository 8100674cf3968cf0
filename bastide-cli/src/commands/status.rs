//! Status command - print every record of the shared status store.

use std::path::Path;

use bastide_core::StatusSink;

use crate::error::CliError;
use crate::util::{create_config_manager, status_sink};

/// Status command handler
pub fn cmd_status(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let records = status_sink(&config).list_all()?;

    if records.is_empty() {
        println!("No running contexts.");
        return Ok(());
    }

    let name_width = records.keys().map(String::len).max().unwrap_or(4).max(4);
    let region_width = records
        .values()
        .filter_map(|r| r.region.as_deref().map(str::len))
        .max()
        .unwrap_or(6)
        .max(6);

    println!(
        "{:<name_width$}  {:<5}  {:<12}  {:<region_width$}  STATUS",
        "NAME", "PORT", "USERNAME", "REGION"
    );
    println!(
        "{:-<name_width$}  {:-<5}  {:-<12}  {:-<region_width$}  ------",
        "", "", "", ""
    );
    for (name, record) in &records {
        println!(
            "{:<name_width$}  {:<5}  {:<12}  {:<region_width$}  {}",
            name,
            record.port.map(|p| p.to_string()).unwrap_or_default(),
            record.username.as_deref().unwrap_or("-"),
            record.region.as_deref().unwrap_or("-"),
            record.status.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
