//! CLI argument parsing types using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// `Bastide` command-line interface for bastion SSH tunnels
#[derive(Parser)]
#[command(name = "bastide")]
#[command(author, version, about = "Keeps SSH tunnels through cloud bastion sessions alive")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration directory
    #[arg(short, long, global = true, env = "BASTIDE_CONFIG_DIR")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Custom log filter, e.g. `bastide_core=debug`
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a bastion session and keep its tunnel alive
    #[command(subcommand)]
    Create(CreateCommands),

    /// Run many contexts at once
    #[command(subcommand)]
    Parallel(ParallelCommands),

    /// Manage context files
    #[command(subcommand)]
    Context(ContextCommands),

    /// SSH into a running port forward
    #[command(about = "Open an SSH login through a running tunnel")]
    Attach {
        /// Local port of the tunnel (substring match)
        port: Option<String>,

        /// Context name (substring match)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show every running context
    #[command(about = "Show the status of running contexts")]
    Status,
}

/// Options shared by both session kinds
#[derive(Args)]
pub struct CreateArgs {
    /// Context name, defaults to the used context
    pub context: Option<String>,

    /// Run ssh through the system shell
    #[arg(short, long)]
    pub shell: bool,

    /// Skip host key checking
    #[arg(short, long)]
    pub force: bool,
}

/// Session kinds of `create`
#[derive(Subcommand)]
pub enum CreateCommands {
    /// Port-forward session to an IP and port
    Forward(CreateArgs),

    /// Managed SSH session to a compute instance
    Managed(CreateArgs),
}

/// Selects a parallel set instead of the stack
#[derive(Args)]
pub struct SetArgs {
    /// Name of a set under `sets/`
    #[arg(long, conflicts_with = "set_dir")]
    pub set: Option<String>,

    /// Directory holding context files
    #[arg(long, value_name = "DIR")]
    pub set_dir: Option<PathBuf>,
}

/// Stack and parallel set commands
#[derive(Subcommand)]
pub enum ParallelCommands {
    /// Add a context to the stack
    Add {
        /// Context name
        #[arg(default_value = "default")]
        context: String,
    },

    /// Remove a context from the stack
    Remove {
        /// Context name
        #[arg(default_value = "default")]
        context: String,
    },

    /// Create an empty parallel set
    Create {
        /// Set name
        name: String,
    },

    /// List the stack and every parallel set
    List,

    /// Show the contexts a run would start
    Display {
        #[command(flatten)]
        set: SetArgs,
    },

    /// Run every context of the stack or a set
    Run {
        #[command(flatten)]
        set: SetArgs,

        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Skip host key checking
        #[arg(short, long)]
        force: bool,
    },
}

/// Context file commands
#[derive(Subcommand)]
pub enum ContextCommands {
    /// List contexts with their last use
    List,

    /// Print a context, hiding key paths
    Show {
        /// Context name
        name: String,
    },

    /// Use a context when none is given
    Use {
        /// Context name
        name: String,
    },

    /// Write a sample context file
    Generate {
        /// Context name
        name: String,
    },
}
