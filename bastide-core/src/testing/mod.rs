//! Test doubles for the cloud service and the ssh binary
//!
//! [`StubSessionClient`] keeps sessions in memory and counts every call;
//! [`ScriptedLauncher`] replays canned ssh runs. Both are used by the unit
//! tests and the integration tests of this crate.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::client::{
    ManagedSshRequest, PortForwardRequest, RemoteSession, RemoteState, SessionClient,
    TargetResourceDetails,
};
use crate::error::{SessionError, SessionResult};
use crate::tunnel::{TunnelChild, TunnelCommand, TunnelLauncher};

/// Line that marks an established tunnel in scripted output
pub const CONNECTED_LINE: &str = "debug1: pledge: network";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(session_id: &str) -> SessionError {
    SessionError::Service {
        status: Some(404),
        code: Some("NotAuthorizedOrNotFound".to_string()),
        message: format!("session {session_id} not found"),
    }
}

#[derive(Debug)]
struct StubSession {
    session: RemoteSession,
    polls_until_active: usize,
    active_polls_left: Option<usize>,
}

#[derive(Debug, Default)]
struct StubState {
    sessions: BTreeMap<String, StubSession>,
    next_id: u64,
    deleted: Vec<String>,
}

/// In-memory [`SessionClient`]
#[derive(Debug)]
pub struct StubSessionClient {
    state: Mutex<StubState>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    create_failures: AtomicUsize,
    delete_failures: AtomicUsize,
    create_error: SessionError,
    activation_polls: usize,
    active_polls: Option<usize>,
    ttl_seconds: u64,
    created_ago: i64,
    target: Option<(String, u16)>,
    delete_delay: Duration,
}

impl Default for StubSessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubSessionClient {
    /// Sessions become ACTIVE immediately and live for an hour
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            create_failures: AtomicUsize::new(0),
            delete_failures: AtomicUsize::new(0),
            create_error: SessionError::MalformedResponse("stub".to_string()),
            activation_polls: 0,
            active_polls: None,
            ttl_seconds: 3600,
            created_ago: 0,
            target: None,
            delete_delay: Duration::ZERO,
        }
    }

    /// The first `count` creates fail with `error`
    #[must_use]
    pub fn with_create_failures(self, count: usize, error: SessionError) -> Self {
        self.create_failures.store(count, Ordering::SeqCst);
        Self {
            create_error: error,
            ..self
        }
    }

    /// The first `count` deletes fail with a service error
    #[must_use]
    pub fn with_delete_failures(self, count: usize) -> Self {
        self.delete_failures.store(count, Ordering::SeqCst);
        self
    }

    /// New sessions report CREATING for `polls` state polls
    #[must_use]
    pub fn with_activation_polls(mut self, polls: usize) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Active sessions turn DELETED after `polls` further state polls
    #[must_use]
    pub fn with_active_polls(mut self, polls: usize) -> Self {
        self.active_polls = Some(polls);
        self
    }

    /// TTL of new sessions
    #[must_use]
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Backdates the creation time of new sessions
    #[must_use]
    pub fn with_created_ago(mut self, seconds: i64) -> Self {
        self.created_ago = seconds;
        self
    }

    /// Target details reported for new sessions
    #[must_use]
    pub fn with_target(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.target = Some((ip.into(), port));
        self
    }

    /// Each successful delete takes this long
    #[must_use]
    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = delay;
        self
    }

    /// Number of create calls of either kind
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of state polls
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls, failed ones included
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Ids of successfully deleted sessions, in order
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Ids of sessions that are not deleted
    #[must_use]
    pub fn live_ids(&self) -> Vec<String> {
        lock(&self.state)
            .sessions
            .iter()
            .filter(|(_, s)| !s.session.lifecycle_state.is_gone())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Inserts an ACTIVE session with a known id
    pub fn seed_active(&self, session_id: &str) -> RemoteSession {
        let session = self.new_session(session_id.to_string(), RemoteState::Active);
        lock(&self.state).sessions.insert(
            session_id.to_string(),
            StubSession {
                session: session.clone(),
                polls_until_active: 0,
                active_polls_left: self.active_polls,
            },
        );
        session
    }

    /// Forces the state of a session
    pub fn set_state(&self, session_id: &str, state: RemoteState) {
        if let Some(stub) = lock(&self.state).sessions.get_mut(session_id) {
            stub.session.lifecycle_state = state;
            stub.polls_until_active = 0;
        }
    }

    /// Current state of a session
    #[must_use]
    pub fn state_of(&self, session_id: &str) -> Option<RemoteState> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .map(|s| s.session.lifecycle_state.clone())
    }

    fn new_session(&self, id: String, state: RemoteState) -> RemoteSession {
        RemoteSession {
            id,
            lifecycle_state: state,
            time_created: Some(Utc::now() - chrono::Duration::seconds(self.created_ago)),
            session_ttl_in_seconds: Some(self.ttl_seconds),
            target_resource_details: self.target.as_ref().map(|(ip, port)| TargetResourceDetails {
                target_resource_private_ip_address: Some(ip.clone()),
                target_resource_port: Some(*port),
                ..TargetResourceDetails::default()
            }),
            bastion_name: Some("stub-bastion".to_string()),
            display_name: None,
        }
    }

    fn create(&self, display_name: &str) -> SessionResult<RemoteSession> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.create_error.clone());
        }

        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = format!("ocid1.bastionsession.stub.{}", state.next_id);
        let initial = if self.activation_polls == 0 {
            RemoteState::Active
        } else {
            RemoteState::Creating
        };
        let mut session = self.new_session(id.clone(), initial);
        session.display_name = Some(display_name.to_string());
        state.sessions.insert(
            id,
            StubSession {
                session: session.clone(),
                polls_until_active: self.activation_polls,
                active_polls_left: self.active_polls,
            },
        );
        Ok(session)
    }
}

#[async_trait]
impl SessionClient for StubSessionClient {
    async fn create_port_forward_session(
        &self,
        request: &PortForwardRequest,
    ) -> SessionResult<RemoteSession> {
        self.create(&request.display_name)
    }

    async fn create_managed_ssh_session(
        &self,
        request: &ManagedSshRequest,
    ) -> SessionResult<RemoteSession> {
        self.create(&request.display_name)
    }

    async fn get_session(
        &self,
        session_id: &str,
        _region: Option<&str>,
    ) -> SessionResult<RemoteSession> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let stub = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;

        match stub.session.lifecycle_state {
            RemoteState::Creating => {
                stub.polls_until_active = stub.polls_until_active.saturating_sub(1);
                if stub.polls_until_active == 0 {
                    stub.session.lifecycle_state = RemoteState::Active;
                }
            }
            RemoteState::Active => {
                if let Some(left) = stub.active_polls_left.as_mut() {
                    if *left == 0 {
                        stub.session.lifecycle_state = RemoteState::Deleted;
                    } else {
                        *left -= 1;
                    }
                }
            }
            _ => {}
        }
        Ok(stub.session.clone())
    }

    async fn delete_session(&self, session_id: &str, _region: Option<&str>) -> SessionResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .delete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::Service {
                status: Some(409),
                code: Some("Conflict".to_string()),
                message: "busy".to_string(),
            });
        }
        if !self.delete_delay.is_zero() {
            tokio::time::sleep(self.delete_delay).await;
        }

        let mut state = lock(&self.state);
        let stub = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        stub.session.lifecycle_state = RemoteState::Deleted;
        state.deleted.push(session_id.to_string());
        Ok(())
    }
}

/// One canned ssh run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedRun {
    lines: Vec<String>,
    exit_code: Option<i32>,
    hang: bool,
}

impl ScriptedRun {
    /// Prints `lines` then exits with `exit_code`
    #[must_use]
    pub fn new(lines: Vec<String>, exit_code: i32) -> Self {
        Self {
            lines,
            exit_code: Some(exit_code),
            hang: false,
        }
    }

    /// Exits immediately with `exit_code`
    #[must_use]
    pub fn exit(exit_code: i32) -> Self {
        Self::new(Vec::new(), exit_code)
    }

    /// Connects, then exits with `exit_code`
    #[must_use]
    pub fn connected_then_exit(exit_code: i32) -> Self {
        Self::new(vec![CONNECTED_LINE.to_string()], exit_code)
    }

    /// Connects and stays up until killed
    #[must_use]
    pub fn connected_and_hold() -> Self {
        Self {
            lines: vec![CONNECTED_LINE.to_string()],
            exit_code: None,
            hang: true,
        }
    }

    /// Prints nothing and never exits until killed
    #[must_use]
    pub fn hang() -> Self {
        Self {
            lines: Vec::new(),
            exit_code: None,
            hang: true,
        }
    }
}

/// [`TunnelLauncher`] replaying [`ScriptedRun`]s in order
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    runs: Mutex<VecDeque<ScriptedRun>>,
    fallback: Option<ScriptedRun>,
    commands: Mutex<Vec<TunnelCommand>>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    /// Replays `runs`; spawning fails once they are used up
    #[must_use]
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            ..Self::default()
        }
    }

    /// Replays `run` `times` times
    #[must_use]
    pub fn repeat(run: ScriptedRun, times: usize) -> Self {
        Self::new(vec![run; times])
    }

    /// Replays `run` whenever the queue is empty
    #[must_use]
    pub fn with_fallback(mut self, run: ScriptedRun) -> Self {
        self.fallback = Some(run);
        self
    }

    /// Number of spawned processes
    #[must_use]
    pub fn spawns(&self) -> usize {
        lock(&self.commands).len()
    }

    /// Commands passed to `spawn`, in order
    #[must_use]
    pub fn commands(&self) -> Vec<TunnelCommand> {
        lock(&self.commands).clone()
    }

    /// Number of kill requests
    #[must_use]
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelLauncher for ScriptedLauncher {
    async fn spawn(&self, command: &TunnelCommand) -> std::io::Result<Box<dyn TunnelChild>> {
        let run = lock(&self.runs)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted run left")
            })?;
        lock(&self.commands).push(command.clone());
        Ok(Box::new(ScriptedChild {
            lines: run.lines.into(),
            exit_code: run.exit_code,
            hang: run.hang,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct ScriptedChild {
    lines: VecDeque<String>,
    exit_code: Option<i32>,
    hang: bool,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelChild for ScriptedChild {
    async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.lines.pop_front() {
            return Some(line);
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.exit_code)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.hang = false;
        self.exit_code = None;
        Ok(())
    }
}
