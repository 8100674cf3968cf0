//! Coordinated shutdown
//!
//! [`ShutdownContext`] is handed to every worker at spawn time. It carries
//! the shared [`StopSignal`] and the registry of remote sessions that must
//! be deleted before the process exits. OS signals only flip the stop
//! signal; the deletion fan-out in [`ShutdownContext::kill_all`] runs on an
//! ordinary task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tracing::Instrument;

use crate::client::{DeletePolicy, SessionClient, ensure_deleted};
use crate::error::SessionError;
use crate::tracing::span_names;

/// Default number of concurrent deletions during shutdown
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Process-wide stop flag that can be awaited
///
/// Transitions from running to stopped exactly once and never back.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Creates a signal in the running state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop, waking every waiter
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub fn stop(&self) -> bool {
        let first = !self.inner.stopped.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Checks whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Completes once a stop has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless stopped first
    ///
    /// Returns `true` if the sleep was cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancelled() => true,
            () = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Outcome of a [`ShutdownContext::kill_all`] pass
#[derive(Debug, Default)]
pub struct KillReport {
    /// Sessions deleted (or found already gone)
    pub deleted: Vec<String>,
    /// Sessions whose deletion failed
    pub failed: Vec<(String, SessionError)>,
}

impl KillReport {
    /// Number of sessions this pass handled
    #[must_use]
    pub fn total(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }
}

/// Stop signal plus registry of live remote sessions
#[derive(Clone, Debug)]
pub struct ShutdownContext {
    signal: StopSignal,
    sessions: Arc<Mutex<BTreeMap<String, Option<String>>>>,
    concurrency: usize,
    delete_policy: DeletePolicy,
}

impl Default for ShutdownContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownContext {
    /// Creates a context in the running state
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: StopSignal::new(),
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            concurrency: DEFAULT_CONCURRENCY,
            delete_policy: DeletePolicy::default(),
        }
    }

    /// Sets the number of concurrent deletions
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry policy used for every deletion
    #[must_use]
    pub const fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Shared stop signal
    #[must_use]
    pub fn signal(&self) -> &StopSignal {
        &self.signal
    }

    /// Checks whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    /// Retry policy used for deletions
    #[must_use]
    pub const fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<String, Option<String>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks a newly created session
    pub fn register(&self, session_id: &str, region: Option<&str>) {
        self.registry()
            .insert(session_id.to_string(), region.map(ToString::to_string));
        tracing::debug!(session_id, "Session registered for shutdown");
    }

    /// Removes a session from the registry, returning its region if it was tracked
    ///
    /// Whoever takes a session owns its deletion.
    pub fn take(&self, session_id: &str) -> Option<Option<String>> {
        self.registry().remove(session_id)
    }

    /// Ids of the sessions currently tracked
    #[must_use]
    pub fn tracked(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }

    /// Deletes one tracked session if nobody else has taken it
    ///
    /// # Errors
    ///
    /// Returns the deletion error once the retry policy is exhausted.
    pub async fn release(
        &self,
        client: &dyn SessionClient,
        session_id: &str,
    ) -> Result<bool, SessionError> {
        match self.take(session_id) {
            Some(region) => {
                ensure_deleted(client, session_id, region.as_deref(), self.delete_policy).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops every worker and deletes every tracked session
    ///
    /// The stop signal is set before anything else so no worker creates a
    /// new session afterwards. Deletions run concurrently and independently;
    /// the call returns once all of them finished. Calling it again only
    /// handles sessions registered since the previous call.
    pub async fn kill_all(&self, client: &dyn SessionClient) -> KillReport {
        if self.signal.stop() {
            tracing::info!("Stop requested, tearing down all sessions");
        }

        let drained: Vec<(String, Option<String>)> =
            std::mem::take(&mut *self.registry()).into_iter().collect();
        if drained.is_empty() {
            return KillReport::default();
        }

        let policy = self.delete_policy;
        let span = tracing::info_span!(span_names::SHUTDOWN_KILL_ALL, sessions = drained.len());
        let results: Vec<(String, Result<(), SessionError>)> = stream::iter(drained)
            .map(|(session_id, region)| async move {
                let result = ensure_deleted(client, &session_id, region.as_deref(), policy).await;
                (session_id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .instrument(span)
            .await;

        let mut report = KillReport::default();
        for (session_id, result) in results {
            match result {
                Ok(()) => report.deleted.push(session_id),
                Err(e) => {
                    tracing::error!(session_id, error = %e, "Failed to delete session");
                    report.failed.push((session_id, e));
                }
            }
        }
        report
    }
}

/// Waits for an interrupt, terminate or quit signal
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// Spawns a task that flips `signal` when the process is asked to stop
pub fn spawn_signal_listener(signal: StopSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal.stop();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
        }
    })
}
