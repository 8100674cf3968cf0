//! Parallel commands - maintain the stack and run many contexts at once.

use std::io::Write;
use std::path::{Path, PathBuf};

use bastide_core::scheduler::{create_set, list_sets, resolve_set};
use bastide_core::{ConfigManager, RunPlan, Scheduler, Stack, render_table, spawn_signal_listener};

use crate::cli::SetArgs;
use crate::error::CliError;
use crate::util::{confirm, create_config_manager, create_runtime, lifecycle_deps};

/// Clears the terminal and moves the cursor home
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Add command handler
pub fn cmd_add(config_path: Option<&Path>, context: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let mut stack = Stack::load(&config)?;
    stack.add(&config, context)?;
    println!("Added {context} to the stack");
    Ok(())
}

/// Remove command handler
pub fn cmd_remove(config_path: Option<&Path>, context: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let mut stack = Stack::load(&config)?;
    if stack.remove(context)? {
        println!("Removed {context} from the stack");
    } else {
        println!("{context} is not in the stack");
    }
    Ok(())
}

/// Create set command handler
pub fn cmd_create_set(config_path: Option<&Path>, name: &str) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let dir = create_set(&config, name)?;
    println!("Created set {name} at {}", dir.display());
    println!("Copy context files into it, then run `bastide parallel run --set {name}`");
    Ok(())
}

/// List command handler
pub fn cmd_list(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let stack = Stack::load(&config)?;

    println!("Stack:");
    if stack.is_empty() {
        println!("  (empty)");
    }
    for member in stack.members() {
        println!("  {member}");
    }

    for (name, members) in list_sets(&config)? {
        println!("Set {name}:");
        if members.is_empty() {
            println!("  (empty)");
        }
        for member in members {
            println!("  {member}");
        }
    }
    Ok(())
}

/// Display command handler
pub fn cmd_display(config_path: Option<&Path>, set: &SetArgs) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let set_dir = resolve_set_dir(&config, set)?;
    let scheduler = Scheduler::new(config.clone(), lifecycle_deps(&config, false));

    let rows = scheduler.planned(set_dir.as_deref())?;
    println!("{}", render_table(&rows));
    Ok(())
}

/// Run command handler
///
/// Redraws the table every second until interrupted, then deletes every
/// session and waits for the workers to finish.
pub fn cmd_run(
    config_path: Option<&Path>,
    set: &SetArgs,
    yes: bool,
    force: bool,
) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let set_dir = resolve_set_dir(&config, set)?;
    let deps = lifecycle_deps(&config, false);
    let scheduler = Scheduler::new(config.clone(), deps.clone());

    let planned = scheduler.planned(set_dir.as_deref())?;
    if !yes {
        println!("{}", render_table(&planned));
        if force {
            println!("Host key checking will be disabled for every tunnel.");
        }
        if !confirm("Start these contexts?")? {
            println!("Aborted");
            return Ok(());
        }
    }

    let plan = RunPlan::default().with_force(force).with_set_dir(set_dir);
    let runtime = create_runtime()?;
    let summary = runtime.block_on(async {
        let listener = spawn_signal_listener(deps.shutdown.signal().clone());
        let summary = scheduler
            .run(&plan, |rows| {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{CLEAR_SCREEN}{}", render_table(rows));
                let _ = stdout.flush();
            })
            .await;
        listener.abort();
        summary
    })?;

    if !summary.killed.deleted.is_empty() {
        println!("Deleted {} bastion session(s)", summary.killed.deleted.len());
    }
    for (session_id, e) in &summary.killed.failed {
        eprintln!("Failed to delete bastion session {session_id}: {e}");
    }

    let failed: Vec<_> = summary.failed().collect();
    for outcome in &failed {
        if let Some(Err(e)) = &outcome.result {
            eprintln!("{}: {e}", outcome.name);
        }
    }
    if !failed.is_empty() && failed.len() == summary.workers.len() {
        return Err(CliError::Parallel(
            "every context stopped on an error".to_string(),
        ));
    }
    Ok(())
}

fn resolve_set_dir(config: &ConfigManager, set: &SetArgs) -> Result<Option<PathBuf>, CliError> {
    if let Some(name) = &set.set {
        return Ok(Some(resolve_set(config, name)?));
    }
    Ok(set.set_dir.clone())
}
