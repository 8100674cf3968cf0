//! Reconnect decision after a tunnel exit

use chrono::{DateTime, Utc};

use crate::client::RemoteSession;

/// What to do after a tunnel process exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Relaunch the tunnel
    Reconnect {
        /// Seconds of TTL left
        remaining_seconds: i64,
    },
    /// The remote session is no longer active
    Deleted,
    /// The TTL has run out (or is unknown)
    Expired,
    /// A stop was requested
    Stopped,
}

/// Decides whether a tunnel may be relaunched against `session`
///
/// A session without a creation time or TTL is treated as expired so that a
/// fresh session gets created instead of reconnecting blindly.
#[must_use]
pub fn decide_reconnect(
    session: &RemoteSession,
    now: DateTime<Utc>,
    stopped: bool,
) -> ReconnectDecision {
    if stopped {
        return ReconnectDecision::Stopped;
    }
    if !session.is_active() {
        return ReconnectDecision::Deleted;
    }
    match session.remaining_ttl(now) {
        Some(remaining_seconds) if remaining_seconds > 0 => {
            ReconnectDecision::Reconnect { remaining_seconds }
        }
        _ => ReconnectDecision::Expired,
    }
}
