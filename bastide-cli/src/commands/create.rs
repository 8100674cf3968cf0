//! Create command - run one context in fullauto mode.

use std::path::Path;

use bastide_core::{
    RetryConfig, SessionKind, SessionLifecycle, Termination, run_fullauto, spawn_signal_listener,
};

use crate::cli::CreateArgs;
use crate::error::CliError;
use crate::util::{create_config_manager, create_runtime, lifecycle_deps, resolve_context};

/// Create command handler
///
/// Recreates the session whenever it ends until the user closes the tunnel
/// or a stop signal arrives. Every tracked session is deleted before
/// returning.
pub fn cmd_create(
    config_path: Option<&Path>,
    kind: SessionKind,
    args: &CreateArgs,
) -> Result<(), CliError> {
    let config = create_config_manager(config_path)?;
    let context = resolve_context(&config, args.context.as_deref())?;
    let deps = lifecycle_deps(&config, args.shell);
    let lifecycle =
        SessionLifecycle::new(context, kind, config, deps.clone()).with_force(args.force);

    let runtime = create_runtime()?;
    let result = runtime.block_on(async {
        let listener = spawn_signal_listener(deps.shutdown.signal().clone());
        let printer = spawn_status_printer(&lifecycle);

        let result = run_fullauto(&lifecycle, RetryConfig::fullauto()).await;

        let report = deps.shutdown.kill_all(deps.client.as_ref()).await;
        for (session_id, e) in &report.failed {
            eprintln!("Failed to delete bastion session {session_id}: {e}");
        }
        printer.abort();
        listener.abort();
        result
    });

    let termination = result?;
    if termination != Termination::Stopped {
        eprintln!("[{}] {termination}", lifecycle.name());
    }
    Ok(())
}

/// Prints each new status line of the lifecycle to stderr
fn spawn_status_printer(lifecycle: &SessionLifecycle) -> tokio::task::JoinHandle<()> {
    let mut report = lifecycle.subscribe();
    let name = lifecycle.name().to_string();
    tokio::spawn(async move {
        let mut last = String::new();
        while report.changed().await.is_ok() {
            let status = report.borrow_and_update().status.clone();
            if !status.is_empty() && status != last {
                eprintln!("[{name}] {status}");
                last = status;
            }
        }
    })
}
