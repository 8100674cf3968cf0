use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::Instrument;

use super::{
    ATTEMPTS_PER_CYCLE, LifecycleError, LifecyclePhase, LifecycleReport, LifecycleResult,
    LifecycleTimings, ReconnectDecision, SessionKind, Termination, decide_reconnect,
};
use crate::client::{
    ManagedSshRequest, PortForwardRequest, RemoteSession, RemoteState, SessionClient,
};
use crate::config::{ConfigManager, ContextRef, ManagedTarget, PortForwardTarget};
use crate::error::SessionError;
use crate::retry::{AuthBudget, DEFAULT_AUTH_BUDGET, RetryConfig, RetryState};
use crate::shutdown::ShutdownContext;
use crate::status::{StatusRecord, StatusSink};
use crate::tracing::span_names;
use crate::tunnel::{
    KNOWN_HOSTS_HINT, STATUS_CONNECTED, TunnelCommand, TunnelExit, TunnelHandle, TunnelLauncher,
};

/// Collaborators shared by every lifecycle of a process
#[derive(Clone)]
pub struct LifecycleDeps {
    /// Bastion session service
    pub client: Arc<dyn SessionClient>,
    /// Tunnel process launcher
    pub launcher: Arc<dyn TunnelLauncher>,
    /// Shared status store
    pub sink: Arc<dyn StatusSink>,
    /// Stop signal and session registry
    pub shutdown: ShutdownContext,
}

impl std::fmt::Debug for LifecycleDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDeps")
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// Resolved context of one run
enum Target {
    Forward(PortForwardTarget),
    Managed(ManagedTarget),
}

impl Target {
    fn region(&self) -> Option<&str> {
        match self {
            Self::Forward(t) => t.region.as_deref(),
            Self::Managed(t) => t.region.as_deref(),
        }
    }

    fn custom_args(&self) -> Option<&str> {
        match self {
            Self::Forward(t) => t.custom_args.as_deref(),
            Self::Managed(t) => t.custom_args.as_deref(),
        }
    }
}

/// Session created by the current run, owned until cleanup
struct ActiveSession {
    id: String,
}

enum WaitOutcome {
    Active(RemoteSession),
    Gone,
    Stopped,
    TimedOut,
}

/// State machine driving one context
pub struct SessionLifecycle {
    context: ContextRef,
    kind: SessionKind,
    config: ConfigManager,
    deps: LifecycleDeps,
    force: bool,
    timings: LifecycleTimings,
    auth: Mutex<AuthBudget>,
    create_retry: RetryConfig,
    activation_timeout: Option<Duration>,
    report: watch::Sender<LifecycleReport>,
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("context", &self.context.name)
            .field("kind", &self.kind)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl SessionLifecycle {
    /// Creates a lifecycle for one context
    #[must_use]
    pub fn new(
        context: ContextRef,
        kind: SessionKind,
        config: ConfigManager,
        deps: LifecycleDeps,
    ) -> Self {
        let (report, _) = watch::channel(LifecycleReport::default());
        Self {
            context,
            kind,
            config,
            deps,
            force: false,
            timings: LifecycleTimings::default(),
            auth: Mutex::new(AuthBudget::new(DEFAULT_AUTH_BUDGET)),
            create_retry: RetryConfig::session_create(),
            activation_timeout: None,
            report,
        }
    }

    /// Relaxes host key verification for the tunnel
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overrides the pauses of the state machine
    #[must_use]
    pub const fn with_timings(mut self, timings: LifecycleTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Sets the number of tolerated authorization failures
    ///
    /// The budget outlives a single run; only a connected tunnel refills it.
    #[must_use]
    pub fn with_auth_budget(mut self, budget: u32) -> Self {
        self.auth = Mutex::new(AuthBudget::new(budget));
        self
    }

    /// Sets the session creation retry policy
    #[must_use]
    pub fn with_create_retry(mut self, retry: RetryConfig) -> Self {
        self.create_retry = retry;
        self
    }

    /// Bounds the wait for session activation, overriding `config.json`
    #[must_use]
    pub const fn with_activation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Context name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Session kind
    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Shared shutdown context
    #[must_use]
    pub fn shutdown(&self) -> &ShutdownContext {
        &self.deps.shutdown
    }

    /// Subscribes to live reports
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleReport> {
        self.report.subscribe()
    }

    /// Latest report
    #[must_use]
    pub fn report(&self) -> LifecycleReport {
        self.report.borrow().clone()
    }

    /// Authorization failures still tolerated across runs
    #[must_use]
    pub fn auth_budget(&self) -> AuthBudget {
        *self.auth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one incarnation: create, wait, tunnel, reconnect, clean up
    ///
    /// The remote session and the status entry are released on every exit
    /// path, errors included.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`]; use [`LifecycleError::is_fatal`] to
    /// decide whether restarting makes sense.
    pub async fn run_once(&self) -> LifecycleResult<Termination> {
        let span = tracing::info_span!(
            span_names::LIFECYCLE_RUN,
            context = %self.name(),
            kind = ?self.kind
        );
        self.report.send_replace(LifecycleReport::default());

        let mut active = None;
        let result = self.drive(&mut active).instrument(span.clone()).await;
        self.cleanup(active, &result).instrument(span).await;
        result
    }

    async fn drive(&self, active: &mut Option<ActiveSession>) -> LifecycleResult<Termination> {
        let stop = self.deps.shutdown.signal();
        if stop.is_stopped() {
            return Ok(Termination::Stopped);
        }

        self.set_phase(LifecyclePhase::CreatingSession);
        tracing::info!("Loading credentials");
        let ctx = self.config.load_context_at(&self.context)?;
        let global = self.config.load_global()?;
        let target = match self.kind {
            SessionKind::PortForward => {
                Target::Forward(ctx.port_forward_target(self.name(), &global)?)
            }
            SessionKind::ManagedSsh => Target::Managed(ctx.managed_target(self.name(), &global)?),
        };
        if let Err(e) = self.config.mark_used(&self.context) {
            tracing::debug!(error = %e, "Could not stamp last-time-used");
        }
        if target.custom_args().is_some() {
            tracing::warn!("Custom ssh arguments can prevent the ssh command from working");
        }
        if self.force {
            tracing::warn!("Host key verification is disabled for this tunnel");
        }
        self.announce(&target);

        let region = target.region().map(ToString::to_string);
        self.publish_status("creating bastion session");
        let Some(created) = self.create_session(&target).await? else {
            return Ok(Termination::Stopped);
        };
        self.deps
            .shutdown
            .register(&created.id, region.as_deref());
        *active = Some(ActiveSession {
            id: created.id.clone(),
        });
        self.report.send_modify(|r| {
            r.session_id = Some(created.id.clone());
            r.region.clone_from(&region);
        });
        if stop.is_stopped() {
            return Ok(Termination::Stopped);
        }

        self.set_phase(LifecyclePhase::WaitingActive);
        self.publish_status("waiting for session init");
        let timeout = self
            .activation_timeout
            .or_else(|| global.session_activation_timeout.map(Duration::from_secs));
        let session = match self
            .wait_active(&created.id, region.as_deref(), timeout)
            .await?
        {
            WaitOutcome::Active(session) => session,
            WaitOutcome::Gone => {
                self.publish_status("bastion session deleted");
                return Ok(Termination::SessionDeleted);
            }
            WaitOutcome::Stopped => return Ok(Termination::Stopped),
            WaitOutcome::TimedOut => return Ok(Termination::ActivationTimedOut),
        };
        if stop.sleep(self.timings.settle_delay).await {
            return Ok(Termination::Stopped);
        }

        let command = match &target {
            Target::Forward(t) => TunnelCommand::port_forward(t, &created.id, self.force),
            Target::Managed(t) => {
                tracing::info!("Auto resolving target details from response");
                let (ip, port) = created
                    .target_endpoint()
                    .or_else(|| session.target_endpoint())
                    .ok_or_else(|| {
                        SessionError::MalformedResponse(
                            "session carries no target details".to_string(),
                        )
                    })?;
                TunnelCommand::managed(t, &created.id, &ip, port, self.force)
            }
        };
        self.tunnel_loop(&command, &created.id, region.as_deref())
            .await
    }

    /// Creates the remote session, retrying per `create_retry`
    ///
    /// Returns `None` when a stop arrives between attempts.
    async fn create_session(&self, target: &Target) -> LifecycleResult<Option<RemoteSession>> {
        let stop = self.deps.shutdown.signal();
        let mut retry = RetryState::new(self.create_retry.clone());
        loop {
            if stop.is_stopped() {
                return Ok(None);
            }
            let result = match target {
                Target::Forward(t) => {
                    self.deps
                        .client
                        .create_port_forward_session(&PortForwardRequest::from(t))
                        .await
                }
                Target::Managed(t) => {
                    self.deps
                        .client
                        .create_managed_ssh_session(&ManagedSshRequest::from(t))
                        .await
                }
            };

            match result {
                Ok(session) => {
                    tracing::info!(
                        session_id = %session.id,
                        bastion = session.bastion_name.as_deref().unwrap_or_default(),
                        "Created bastion session"
                    );
                    self.publish_status("creating bastion session succeeded");
                    return Ok(Some(session));
                }
                Err(e) if e.is_retryable_create() => {
                    self.publish_status("creating bastion session failed");
                    let delay = retry.next_delay();
                    if !retry.record_failure(e.to_string()) {
                        return Err(LifecycleError::CreateExhausted {
                            attempts: retry.current_attempt(),
                            last: e,
                        });
                    }
                    tracing::warn!(
                        attempt = retry.current_attempt(),
                        error = %e,
                        "Failed to create bastion session, trying again"
                    );
                    if stop.sleep(delay.unwrap_or_default()).await {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    self.publish_status("creating bastion session failed");
                    return Err(e.into());
                }
            }
        }
    }

    async fn wait_active(
        &self,
        session_id: &str,
        region: Option<&str>,
        timeout: Option<Duration>,
    ) -> LifecycleResult<WaitOutcome> {
        let stop = self.deps.shutdown.signal();
        let started = Instant::now();
        tracing::info!("Waiting for bastion session to initialize");
        loop {
            if stop.is_stopped() {
                return Ok(WaitOutcome::Stopped);
            }
            match self.deps.client.get_session(session_id, region).await {
                Ok(session) if session.is_active() => {
                    tracing::info!(session_id, "Bastion session active");
                    return Ok(WaitOutcome::Active(session));
                }
                Ok(session)
                    if session.lifecycle_state.is_gone()
                        || session.lifecycle_state == RemoteState::Failed =>
                {
                    tracing::warn!(
                        session_id,
                        state = %session.lifecycle_state,
                        "Bastion session ended before becoming active"
                    );
                    return Ok(WaitOutcome::Gone);
                }
                Ok(session) => {
                    tracing::trace!(state = %session.lifecycle_state, "Session not active yet");
                }
                Err(e) if e.is_not_found() => return Ok(WaitOutcome::Gone),
                Err(e @ SessionError::ClientUnavailable(_)) => return Err(e.into()),
                Err(e) => tracing::debug!(error = %e, "Session state poll failed"),
            }

            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                tracing::warn!(
                    session_id,
                    timeout_secs = limit.as_secs(),
                    "Bastion session did not become active in time"
                );
                return Ok(WaitOutcome::TimedOut);
            }
            if stop.sleep(self.timings.poll_interval).await {
                return Ok(WaitOutcome::Stopped);
            }
        }
    }

    /// `TunnelUp`/`Reconnecting` loop
    async fn tunnel_loop(
        &self,
        command: &TunnelCommand,
        session_id: &str,
        region: Option<&str>,
    ) -> LifecycleResult<Termination> {
        let stop = self.deps.shutdown.signal();
        let mut handle = TunnelHandle::new(self.name(), self.auth_budget());
        let on_status = |status: &str| self.on_tunnel_status(status);
        let mut attempt = 1;

        loop {
            self.set_phase(LifecyclePhase::TunnelUp);
            self.publish_status("digging tunnel");
            let run = handle
                .run(self.deps.launcher.as_ref(), command, stop, &on_status)
                .await;
            *self.auth.lock().unwrap_or_else(PoisonError::into_inner) = handle.budget();
            let exit = match run {
                Ok(exit) => exit,
                Err(e) => {
                    tracing::error!(error = %e, "{KNOWN_HOSTS_HINT}");
                    return Err(e.into());
                }
            };
            self.report.send_modify(|r| r.connected = false);

            match &exit {
                TunnelExit::UserTerminated => {
                    tracing::info!("User requested termination");
                    self.publish_status("terminated by user");
                    return Ok(Termination::UserTerminated);
                }
                TunnelExit::Cancelled => return Ok(Termination::Stopped),
                TunnelExit::SpawnFailed(reason) => {
                    self.publish_status("ssh tunnel terminated");
                    return Ok(Termination::SpawnFailed(reason.clone()));
                }
                TunnelExit::Disconnected { .. }
                | TunnelExit::AuthFailed { .. }
                | TunnelExit::PermissionDenied { .. } => {}
            }
            if stop.is_stopped() {
                return Ok(Termination::Stopped);
            }

            self.set_phase(LifecyclePhase::Reconnecting);
            let session = match self.deps.client.get_session(session_id, region).await {
                Ok(session) => session,
                Err(e) if e.is_not_found() => {
                    self.publish_status("bastion session deleted");
                    return Ok(Termination::SessionDeleted);
                }
                Err(e) => return Err(e.into()),
            };
            if !session.is_active() {
                tracing::info!(state = %session.lifecycle_state, "Bastion session got deleted");
                self.publish_status("bastion session deleted");
                return Ok(Termination::SessionDeleted);
            }

            if exit.was_connected() {
                attempt = 1;
            } else if attempt < ATTEMPTS_PER_CYCLE {
                attempt += 1;
                tracing::info!(attempt, "Trying another time {attempt}/{ATTEMPTS_PER_CYCLE}");
                self.publish_status(&format!("retrying {attempt}/{ATTEMPTS_PER_CYCLE}"));
                if stop.sleep(self.timings.retry_pause).await {
                    return Ok(Termination::Stopped);
                }
                continue;
            } else {
                attempt = 1;
            }

            match decide_reconnect(&session, Utc::now(), stop.is_stopped()) {
                ReconnectDecision::Reconnect { remaining_seconds } => {
                    tracing::info!(remaining_seconds, "Session still valid, reconnecting");
                    self.publish_status("reconnecting");
                    if stop.sleep(self.timings.retry_pause).await {
                        return Ok(Termination::Stopped);
                    }
                }
                ReconnectDecision::Deleted => {
                    self.publish_status("bastion session deleted");
                    return Ok(Termination::SessionDeleted);
                }
                ReconnectDecision::Expired => {
                    tracing::info!("Session TTL ran out, a new session is needed");
                    self.publish_status("ssh tunnel terminated");
                    return Ok(Termination::TtlExpired);
                }
                ReconnectDecision::Stopped => return Ok(Termination::Stopped),
            }
        }
    }

    /// `Terminated`: release the remote session and the status entry
    async fn cleanup(&self, active: Option<ActiveSession>, result: &LifecycleResult<Termination>) {
        self.set_phase(LifecyclePhase::Terminated);
        if let Some(session) = active {
            self.publish_status("deleting");
            match self
                .deps
                .shutdown
                .release(self.deps.client.as_ref(), &session.id)
                .await
            {
                Ok(true) => tracing::info!(session_id = %session.id, "Cleaned up bastion session"),
                Ok(false) => {
                    tracing::debug!(
                        session_id = %session.id,
                        "Session already released by shutdown"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %e,
                        "Failed to delete bastion session"
                    );
                }
            }
        }
        if let Err(e) = self.deps.sink.remove(self.name()) {
            tracing::warn!(error = %e, "Failed to remove status entry");
        }

        let status = match result {
            Ok(termination) => termination.to_string(),
            Err(e) => format!("failed: {e}"),
        };
        self.report.send_modify(|r| {
            r.phase = LifecyclePhase::Terminated;
            r.connected = false;
            r.session_id = None;
            r.status = status;
        });
    }

    fn announce(&self, target: &Target) {
        let mut record = StatusRecord::status("loading credentials")
            .with_region(target.region().map(ToString::to_string));
        if let Target::Forward(t) = target {
            record = record
                .with_port(t.local_port)
                .with_username(t.username.clone());
            if t.username.is_none() {
                tracing::warn!(
                    "No resource-os-username in context, attach will not work for it"
                );
            }
        }
        self.publish(&record);
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        tracing::debug!(%phase, "Lifecycle phase");
        self.report.send_modify(|r| r.phase = phase);
    }

    fn publish_status(&self, status: &str) {
        tracing::info!(context = %self.name(), status, "Status changed");
        self.publish(&StatusRecord::status(status));
    }

    fn publish(&self, record: &StatusRecord) {
        if let Err(e) = self.deps.sink.publish(self.name(), record) {
            tracing::debug!(error = %e, "Failed to publish status");
        }
        if let Some(ref status) = record.status {
            self.report.send_modify(|r| r.status.clone_from(status));
        }
    }

    fn on_tunnel_status(&self, status: &str) {
        self.publish_status(status);
        if status == STATUS_CONNECTED {
            self.report.send_modify(|r| {
                r.connected = true;
                r.tunnels_up += 1;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemoryStatusSink;
    use crate::testing::{ScriptedLauncher, ScriptedRun, StubSessionClient};
    use crate::tunnel::AUTH_FAILURE_EXIT_CODE;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: ConfigManager,
        client: Arc<StubSessionClient>,
        launcher: Arc<ScriptedLauncher>,
        sink: Arc<MemoryStatusSink>,
        shutdown: ShutdownContext,
    }

    impl Fixture {
        fn new(client: StubSessionClient, launcher: ScriptedLauncher) -> Self {
            let dir = TempDir::new().unwrap();
            let config = ConfigManager::with_config_dir(dir.path().join("cfg"));
            config.ensure_layout().unwrap();
            let public = dir.path().join("id.pub");
            std::fs::write(&public, "ssh-ed25519 AAAA").unwrap();
            std::fs::write(dir.path().join("id"), "PRIVATE").unwrap();
            crate::config::write_json(
                &config.context_ref("db").path,
                &serde_json::json!({
                    "host": "host.bastion.example.com",
                    "bastion-id": "ocid1.bastion",
                    "default-name": "t",
                    "ssh-pub-path": public.display().to_string(),
                    "private-key-path": dir.path().join("id").display().to_string(),
                    "target-ip": "10.0.0.5",
                    "target-port": 5432,
                    "local-port": 15432,
                    "ttl": 3600,
                    "resource-id": "ocid1.instance",
                    "resource-os-username": "opc",
                }),
            )
            .unwrap();
            Self {
                _dir: dir,
                config,
                client: Arc::new(client),
                launcher: Arc::new(launcher),
                sink: Arc::new(MemoryStatusSink::new()),
                shutdown: ShutdownContext::new(),
            }
        }

        fn lifecycle(&self, kind: SessionKind) -> SessionLifecycle {
            let deps = LifecycleDeps {
                client: self.client.clone(),
                launcher: self.launcher.clone(),
                sink: self.sink.clone(),
                shutdown: self.shutdown.clone(),
            };
            SessionLifecycle::new(self.config.context_ref("db"), kind, self.config.clone(), deps)
                .with_timings(LifecycleTimings::uniform(Duration::from_millis(1)))
                .with_create_retry(
                    RetryConfig::session_create()
                        .with_initial_delay_ms(1)
                        .with_max_delay_ms(1),
                )
        }
    }

    #[tokio::test]
    async fn test_user_termination_cleans_up() {
        let fx = Fixture::new(
            StubSessionClient::new(),
            ScriptedLauncher::new(vec![ScriptedRun::connected_then_exit(0)]),
        );
        let lifecycle = fx.lifecycle(SessionKind::PortForward);

        let termination = lifecycle.run_once().await.unwrap();

        assert_eq!(termination, Termination::UserTerminated);
        assert_eq!(lifecycle.report().tunnels_up, 1);
        assert_eq!(fx.client.delete_calls(), 1);
        assert!(fx.sink.get("db").is_none());
        assert!(fx.shutdown.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_remote_deletion_ends_run() {
        let fx = Fixture::new(
            StubSessionClient::new().with_active_polls(1),
            ScriptedLauncher::new(vec![ScriptedRun::connected_then_exit(1)]),
        );
        let termination = fx.lifecycle(SessionKind::PortForward).run_once().await.unwrap();
        assert_eq!(termination, Termination::SessionDeleted);
        assert_eq!(fx.client.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_not_reconnected() {
        let fx = Fixture::new(
            StubSessionClient::new().with_ttl(60).with_created_ago(61),
            ScriptedLauncher::new(vec![ScriptedRun::connected_then_exit(1)]),
        );
        let termination = fx.lifecycle(SessionKind::PortForward).run_once().await.unwrap();
        assert_eq!(termination, Termination::TtlExpired);
        assert_eq!(fx.launcher.spawns(), 1);
    }

    #[tokio::test]
    async fn test_three_attempts_per_cycle_before_ttl_check() {
        let fx = Fixture::new(
            StubSessionClient::new().with_ttl(60).with_created_ago(61),
            ScriptedLauncher::repeat(ScriptedRun::exit(1), 3),
        );
        let termination = fx.lifecycle(SessionKind::PortForward).run_once().await.unwrap();
        assert_eq!(termination, Termination::TtlExpired);
        assert_eq!(fx.launcher.spawns(), 3);
    }

    #[tokio::test]
    async fn test_create_retries_then_fails() {
        let fx = Fixture::new(
            StubSessionClient::new()
                .with_create_failures(5, SessionError::MalformedResponse("{".to_string())),
            ScriptedLauncher::new(Vec::new()),
        );
        let err = fx
            .lifecycle(SessionKind::PortForward)
            .run_once()
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::CreateExhausted { attempts: 3, .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fx.client.create_calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_exhaustion_is_fatal() {
        let fx = Fixture::new(
            StubSessionClient::new(),
            ScriptedLauncher::repeat(ScriptedRun::exit(AUTH_FAILURE_EXIT_CODE), 4),
        );
        let err = fx
            .lifecycle(SessionKind::PortForward)
            .with_auth_budget(4)
            .run_once()
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 255);
        assert_eq!(fx.launcher.spawns(), 4);
        assert_eq!(fx.client.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_exhausts_budget() {
        let denied = ScriptedRun::new(
            vec!["ocid1@host: Permission denied (publickey).".to_string()],
            AUTH_FAILURE_EXIT_CODE,
        );
        let fx = Fixture::new(
            StubSessionClient::new(),
            ScriptedLauncher::new(Vec::new()).with_fallback(denied),
        );
        let lifecycle = fx.lifecycle(SessionKind::PortForward).with_auth_budget(2);

        let err = tokio::time::timeout(Duration::from_secs(5), lifecycle.run_once())
            .await
            .expect("run ends once the budget is used up")
            .unwrap_err();

        assert_eq!(err.exit_code(), 255);
        assert_eq!(fx.launcher.spawns(), 2);
        assert!(lifecycle.auth_budget().is_exhausted());
        assert_eq!(fx.client.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_activation_timeout() {
        let fx = Fixture::new(
            StubSessionClient::new().with_activation_polls(usize::MAX),
            ScriptedLauncher::new(Vec::new()),
        );
        let termination = fx
            .lifecycle(SessionKind::PortForward)
            .with_activation_timeout(Some(Duration::from_millis(20)))
            .run_once()
            .await
            .unwrap();
        assert_eq!(termination, Termination::ActivationTimedOut);
        assert_eq!(fx.client.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_managed_session_uses_resolved_target() {
        let fx = Fixture::new(
            StubSessionClient::new().with_target("10.0.1.7", 22),
            ScriptedLauncher::new(vec![ScriptedRun::exit(0)]),
        );
        let termination = fx.lifecycle(SessionKind::ManagedSsh).run_once().await.unwrap();
        assert_eq!(termination, Termination::UserTerminated);

        let commands = fx.launcher.commands();
        assert!(commands[0].is_interactive());
        assert!(commands[0].to_shell_string().contains("opc@10.0.1.7"));
    }

    #[tokio::test]
    async fn test_missing_context_is_config_error() {
        let fx = Fixture::new(StubSessionClient::new(), ScriptedLauncher::new(Vec::new()));
        let deps = LifecycleDeps {
            client: fx.client.clone(),
            launcher: fx.launcher.clone(),
            sink: fx.sink.clone(),
            shutdown: fx.shutdown.clone(),
        };
        let lifecycle = SessionLifecycle::new(
            fx.config.context_ref("ghost"),
            SessionKind::PortForward,
            fx.config.clone(),
            deps,
        );
        let err = lifecycle.run_once().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
        assert_eq!(fx.client.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let fx = Fixture::new(StubSessionClient::new(), ScriptedLauncher::new(Vec::new()));
        fx.shutdown.signal().stop();
        let termination = fx.lifecycle(SessionKind::PortForward).run_once().await.unwrap();
        assert_eq!(termination, Termination::Stopped);
        assert_eq!(fx.client.create_calls(), 0);
    }
}
