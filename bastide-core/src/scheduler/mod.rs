//! Parallel scheduling of many contexts
//!
//! [`Stack`] persists the contexts run together; [`Scheduler::run`] starts
//! one fullauto worker per member, feeds a live table to the caller every
//! tick and tears everything down once the stop signal fires.

mod member;
mod stack;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{ConfigManager, ContextRef};
use crate::error::ConfigError;
use crate::lifecycle::{
    LifecycleDeps, LifecycleReport, LifecycleResult, LifecycleTimings, SessionKind,
    SessionLifecycle, Termination, run_fullauto,
};
use crate::retry::RetryConfig;
use crate::shutdown::KillReport;
use crate::tracing::span_names;

pub use member::{MemberSnapshot, render_table};
pub use stack::{Stack, create_set, ensure_non_empty, list_sets, resolve_set};

/// Default interval between table redraws
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default time workers get to finish after a stop
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Errors raised while managing the stack or running it
#[derive(Debug, Error)]
pub enum StackError {
    /// The context is already a member
    #[error("{0} is already in the stack")]
    AlreadyPresent(String),

    /// No context file exists for the name
    #[error("No context with name {0}")]
    UnknownContext(String),

    /// Another member forwards the same local port
    #[error("Local port {port} is already taken by {owner}")]
    PortCollision {
        /// Colliding port
        port: u16,
        /// Member that owns the port
        owner: String,
    },

    /// The parallel set already exists
    #[error("Set {0} already exists")]
    SetExists(String),

    /// The parallel set does not exist
    #[error("Parallel set {name} not found in {path}")]
    SetNotFound {
        /// Set name
        name: String,
        /// Expected directory
        path: PathBuf,
    },

    /// The parallel set has no context file
    #[error("No contexts found in {0}")]
    EmptySet(PathBuf),

    /// The stack has no member
    #[error("The stack is empty, add contexts with `parallel add`")]
    EmptyStack,

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error on a set directory
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for stack operations
pub type StackResult<T> = std::result::Result<T, StackError>;

/// Options of one scheduler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Relaxed host key verification for every tunnel
    pub force: bool,
    /// Run a parallel set instead of the stack
    pub set_dir: Option<PathBuf>,
    /// Interval between table redraws
    pub tick: Duration,
    /// Time workers get to finish after a stop
    pub grace: Duration,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            force: false,
            set_dir: None,
            tick: DEFAULT_TICK,
            grace: DEFAULT_GRACE,
        }
    }
}

impl RunPlan {
    /// Sets force mode
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Runs the contexts of a set directory
    #[must_use]
    pub fn with_set_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.set_dir = dir;
        self
    }

    /// Sets the redraw interval
    #[must_use]
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the shutdown grace period
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// How one worker ended
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Context name
    pub name: String,
    /// Last lifecycle result, `None` if the worker was aborted or panicked
    pub result: Option<LifecycleResult<Termination>>,
}

/// Result of a scheduler run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// One entry per worker
    pub workers: Vec<WorkerOutcome>,
    /// Sessions deleted by the shutdown fan-out
    pub killed: KillReport,
}

impl RunSummary {
    /// Workers that stopped on a fatal error
    pub fn failed(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.workers
            .iter()
            .filter(|w| matches!(w.result, Some(Err(_))))
    }
}

struct Worker {
    name: String,
    local_port: Option<u16>,
    region: Option<String>,
    report: watch::Receiver<LifecycleReport>,
    handle: JoinHandle<LifecycleResult<Termination>>,
}

/// Runs a stack or a set of contexts in parallel
pub struct Scheduler {
    config: ConfigManager,
    deps: LifecycleDeps,
    timings: LifecycleTimings,
    restart: RetryConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("deps", &self.deps)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over the given collaborators
    #[must_use]
    pub fn new(config: ConfigManager, deps: LifecycleDeps) -> Self {
        Self {
            config,
            deps,
            timings: LifecycleTimings::default(),
            restart: RetryConfig::fullauto(),
        }
    }

    /// Overrides the lifecycle pauses
    #[must_use]
    pub const fn with_timings(mut self, timings: LifecycleTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Overrides the restart backoff of every worker
    #[must_use]
    pub fn with_restart(mut self, restart: RetryConfig) -> Self {
        self.restart = restart;
        self
    }

    /// Contexts a run would start
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be loaded, the set is empty, or
    /// the stack is empty.
    pub fn members(&self, set_dir: Option<&Path>) -> StackResult<Vec<ContextRef>> {
        match set_dir {
            Some(dir) => ensure_non_empty(&self.config, dir),
            None => {
                let stack = Stack::load(&self.config)?;
                if stack.is_empty() {
                    return Err(StackError::EmptyStack);
                }
                Ok(stack.context_refs(&self.config))
            }
        }
    }

    /// Table rows for the planned members, with their last known status
    ///
    /// # Errors
    ///
    /// See [`Self::members`].
    pub fn planned(&self, set_dir: Option<&Path>) -> StackResult<Vec<MemberSnapshot>> {
        let published = self.deps.sink.list_all().unwrap_or_default();
        Ok(self
            .members(set_dir)?
            .into_iter()
            .map(|context| {
                let (local_port, region) = self.describe(&context);
                let mut row = MemberSnapshot::new(context.name.clone(), local_port);
                row.region = region;
                if let Some(record) = published.get(&context.name) {
                    row.status = record.status.clone().unwrap_or_default();
                }
                row
            })
            .collect())
    }

    /// Runs every member until the stop signal fires
    ///
    /// `on_tick` receives the table rows about once per `plan.tick`. When the
    /// stop signal fires, every tracked session is deleted, workers get
    /// `plan.grace` to finish and are aborted afterwards. Workers that end
    /// on a fatal error stop alone; the run ends early only when all of them
    /// have ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the members cannot be resolved.
    pub async fn run<F>(&self, plan: &RunPlan, mut on_tick: F) -> StackResult<RunSummary>
    where
        F: FnMut(&[MemberSnapshot]) + Send,
    {
        let members = self.members(plan.set_dir.as_deref())?;
        let stop = self.deps.shutdown.signal().clone();
        if plan.force {
            tracing::warn!(
                "Running in force mode, host key checking and known_hosts policies are ignored"
            );
        }
        tracing::info!(count = members.len(), "Running all contexts in parallel");

        let mut workers = Vec::with_capacity(members.len());
        for context in members {
            if stop.is_stopped() {
                break;
            }
            workers.push(self.spawn_worker(context, plan.force));
        }

        loop {
            let rows: Vec<MemberSnapshot> = workers.iter().map(Worker::snapshot).collect();
            on_tick(&rows);
            if workers.iter().all(|w| w.handle.is_finished()) {
                tracing::warn!("Every worker has ended");
                break;
            }
            if stop.sleep(plan.tick).await {
                break;
            }
        }

        let killed = self.kill_all().await;
        let mut outcomes = Vec::with_capacity(workers.len());
        for worker in workers {
            outcomes.push(worker.finish(plan.grace).await);
        }

        let mut summary = RunSummary {
            workers: outcomes,
            killed,
        };
        let late = self.kill_all().await;
        summary.killed.deleted.extend(late.deleted);
        summary.killed.failed.extend(late.failed);

        for outcome in &summary.workers {
            if let Err(e) = self.deps.sink.remove(&outcome.name) {
                tracing::debug!(
                    context = %outcome.name,
                    error = %e,
                    "Failed to remove status entry"
                );
            }
        }
        Ok(summary)
    }

    /// Stops every worker and deletes every tracked session
    ///
    /// Safe to call more than once and from a signal task.
    pub async fn kill_all(&self) -> KillReport {
        let report = self
            .deps
            .shutdown
            .kill_all(self.deps.client.as_ref())
            .await;
        if report.total() > 0 {
            tracing::info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Deleted bastion sessions"
            );
        }
        report
    }

    fn describe(&self, context: &ContextRef) -> (Option<u16>, Option<String>) {
        match ConfigManager::read_context_at(context) {
            Ok(ctx) => (ctx.local_port(&context.name).ok(), ctx.region),
            Err(e) => {
                tracing::debug!(context = %context.name, error = %e, "Could not read context");
                (None, None)
            }
        }
    }

    fn spawn_worker(&self, context: ContextRef, force: bool) -> Worker {
        let name = context.name.clone();
        let (local_port, region) = self.describe(&context);
        let lifecycle = SessionLifecycle::new(
            context,
            SessionKind::PortForward,
            self.config.clone(),
            self.deps.clone(),
        )
        .with_force(force)
        .with_timings(self.timings);
        let report = lifecycle.subscribe();
        let restart = self.restart.clone();
        let span = tracing::info_span!(span_names::SCHEDULER_WORKER, context = %name);

        let handle = tokio::spawn(
            async move {
                let result = run_fullauto(&lifecycle, restart).await;
                if let Err(ref e) = result {
                    tracing::error!(error = %e, "Worker stopped");
                }
                result
            }
            .instrument(span),
        );
        tracing::info!(context = %name, "Started worker");

        Worker {
            name,
            local_port,
            region,
            report,
            handle,
        }
    }
}

impl Worker {
    fn snapshot(&self) -> MemberSnapshot {
        let report = self.report.borrow();
        MemberSnapshot {
            name: self.name.clone(),
            local_port: self.local_port,
            connected: report.connected && !self.handle.is_finished(),
            status: report.status.clone(),
            region: report.region.clone().or_else(|| self.region.clone()),
        }
    }

    async fn finish(self, grace: Duration) -> WorkerOutcome {
        let Self { name, handle, .. } = self;
        let abort = handle.abort_handle();
        let result = match tokio::time::timeout(grace, handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                tracing::error!(context = %name, error = %e, "Worker panicked");
                None
            }
            Err(_) => {
                tracing::warn!(context = %name, "Worker did not stop in time, aborting");
                abort.abort();
                None
            }
        };
        WorkerOutcome { name, result }
    }
}
