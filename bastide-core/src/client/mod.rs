//! Bastion session service client
//!
//! [`SessionClient`] is the seam between the lifecycle and the cloud. The
//! production implementation shells out to the `oci` CLI; tests use
//! [`crate::testing::StubSessionClient`].

mod oci_cli;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SessionError, SessionResult};

pub use oci_cli::OciCliClient;
pub use types::{
    ManagedSshRequest, PortForwardRequest, RemoteSession, RemoteState, TargetResourceDetails,
};

/// Remote bastion session operations
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Creates a port-forwarding session
    async fn create_port_forward_session(
        &self,
        request: &PortForwardRequest,
    ) -> SessionResult<RemoteSession>;

    /// Creates a managed SSH session
    async fn create_managed_ssh_session(
        &self,
        request: &ManagedSshRequest,
    ) -> SessionResult<RemoteSession>;

    /// Fetches the current state of a session
    async fn get_session(&self, session_id: &str, region: Option<&str>)
    -> SessionResult<RemoteSession>;

    /// Requests deletion of a session
    async fn delete_session(&self, session_id: &str, region: Option<&str>) -> SessionResult<()>;
}

/// Bounded retry used when deleting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Pause between attempts
    pub interval: Duration,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(100),
        }
    }
}

/// Deletes a session, tolerating transient service errors
///
/// A session that is already deleted (or being deleted, or unknown to the
/// service) counts as done without issuing another delete.
///
/// # Errors
///
/// Returns the last error once `policy.max_attempts` is exhausted, or
/// immediately when the client backend is unavailable.
pub async fn ensure_deleted(
    client: &dyn SessionClient,
    session_id: &str,
    region: Option<&str>,
    policy: DeletePolicy,
) -> SessionResult<()> {
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts.max(1) {
        match client.get_session(session_id, region).await {
            Ok(session) if session.lifecycle_state.is_gone() => {
                tracing::debug!(
                    session_id,
                    state = %session.lifecycle_state,
                    "Session already gone"
                );
                return Ok(());
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e @ SessionError::ClientUnavailable(_)) => return Err(e),
            Ok(_) | Err(_) => {}
        }

        match client.delete_session(session_id, region).await {
            Ok(()) => {
                tracing::info!(session_id, "Bastion session deleted");
                return Ok(());
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e @ SessionError::ClientUnavailable(_)) => return Err(e),
            Err(e) => {
                tracing::debug!(session_id, attempt, error = %e, "Delete failed, retrying");
                last_error = Some(e);
            }
        }
        tokio::time::sleep(policy.interval).await;
    }

    let error = last_error.unwrap_or_else(|| SessionError::Service {
        status: None,
        code: None,
        message: format!("could not delete session {session_id}"),
    });
    tracing::warn!(session_id, error = %error, "Giving up on session deletion");
    Err(error)
}
