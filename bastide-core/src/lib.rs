//! `Bastide` Core Library
//!
//! Keeps SSH tunnels through cloud bastion sessions alive: creates the
//! remote session, waits for it, supervises the `ssh` process, reconnects or
//! recreates as needed and deletes every session on shutdown.
//!
//! # Crate Structure
//!
//! - [`config`] - Context files, global settings and directory layout
//! - [`client`] - Bastion session service contract and the `oci` CLI client
//! - [`tunnel`] - SSH command construction and process supervision
//! - [`lifecycle`] - Per-context state machine and the fullauto loop
//! - [`scheduler`] - Stack persistence and parallel runs
//! - [`shutdown`] - Stop signal and coordinated session deletion
//! - [`status`] - Shared status store read by `attach`
//! - [`testing`] - In-memory doubles for the cloud and `ssh`

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod testing;
pub mod tracing;
pub mod tunnel;

pub use client::{
    DeletePolicy, ManagedSshRequest, OciCliClient, PortForwardRequest, RemoteSession,
    RemoteState, SessionClient, ensure_deleted,
};
pub use config::{
    ConfigManager, ConfigPaths, Context, ContextRef, ContextSummary, GlobalConfig,
    ManagedTarget, PortForwardTarget,
};
pub use error::{BastideError, ConfigError, ConfigResult, SessionError, SessionResult};
pub use lifecycle::{
    LifecycleDeps, LifecycleError, LifecyclePhase, LifecycleReport, LifecycleResult,
    LifecycleTimings, ReconnectDecision, SessionKind, SessionLifecycle, Termination,
    decide_reconnect, run_fullauto,
};
pub use retry::{AuthBudget, RetryConfig, RetryState};
pub use scheduler::{
    MemberSnapshot, RunPlan, RunSummary, Scheduler, Stack, StackError, StackResult,
    render_table,
};
pub use shutdown::{KillReport, ShutdownContext, StopSignal, spawn_signal_listener};
pub use status::{FileStatusSink, MemoryStatusSink, StatusError, StatusRecord, StatusSink};
pub use crate::tracing::{
    TracingConfig, TracingError, TracingLevel, TracingOutput, init_tracing,
    is_tracing_initialized,
};
pub use tunnel::{
    SystemLauncher, TunnelCommand, TunnelError, TunnelExit, TunnelHandle, TunnelLauncher,
};
