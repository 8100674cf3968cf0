//! Command handler modules for the CLI.

mod attach;
mod context;
mod create;
mod parallel;
mod status;

use std::path::Path;

use bastide_core::SessionKind;

use crate::cli::{Commands, ContextCommands, CreateCommands, ParallelCommands};
use crate::error::CliError;

/// Dispatch a CLI command to the appropriate handler.
pub fn dispatch(config_path: Option<&Path>, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Create(CreateCommands::Forward(args)) => {
            create::cmd_create(config_path, SessionKind::PortForward, &args)
        }
        Commands::Create(CreateCommands::Managed(args)) => {
            create::cmd_create(config_path, SessionKind::ManagedSsh, &args)
        }
        Commands::Parallel(subcmd) => match subcmd {
            ParallelCommands::Add { context } => parallel::cmd_add(config_path, &context),
            ParallelCommands::Remove { context } => parallel::cmd_remove(config_path, &context),
            ParallelCommands::Create { name } => parallel::cmd_create_set(config_path, &name),
            ParallelCommands::List => parallel::cmd_list(config_path),
            ParallelCommands::Display { set } => parallel::cmd_display(config_path, &set),
            ParallelCommands::Run { set, yes, force } => {
                parallel::cmd_run(config_path, &set, yes, force)
            }
        },
        Commands::Context(subcmd) => match subcmd {
            ContextCommands::List => context::cmd_list(config_path),
            ContextCommands::Show { name } => context::cmd_show(config_path, &name),
            ContextCommands::Use { name } => context::cmd_use(config_path, &name),
            ContextCommands::Generate { name } => context::cmd_generate(config_path, &name),
        },
        Commands::Attach { port, name } => {
            attach::cmd_attach(config_path, port.as_deref(), name.as_deref())
        }
        Commands::Status => status::cmd_status(config_path),
    }
}
