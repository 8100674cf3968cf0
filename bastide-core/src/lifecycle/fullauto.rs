//! Unattended restart loop around [`SessionLifecycle`]

use super::{LifecycleResult, SessionLifecycle, Termination};
use crate::retry::{RetryConfig, RetryState};

/// Runs `lifecycle` again and again until the user or a stop ends it
///
/// A run that ends in [`Termination::UserTerminated`] or
/// [`Termination::Stopped`] is returned. Fatal errors are returned as well;
/// everything else restarts the lifecycle after a backoff pause. The pause
/// starts over once a run managed to bring a tunnel up.
///
/// # Errors
///
/// Returns the first fatal [`super::LifecycleError`].
pub async fn run_fullauto(
    lifecycle: &SessionLifecycle,
    restart: RetryConfig,
) -> LifecycleResult<Termination> {
    let stop = lifecycle.shutdown().signal().clone();
    let mut backoff = RetryState::new(restart);
    let mut runs: u64 = 0;

    loop {
        runs += 1;
        tracing::info!(context = %lifecycle.name(), run = runs, "Starting session lifecycle");
        match lifecycle.run_once().await {
            Ok(Termination::UserTerminated) => return Ok(Termination::UserTerminated),
            Ok(Termination::Stopped) => return Ok(Termination::Stopped),
            Ok(termination) => {
                tracing::info!(
                    context = %lifecycle.name(),
                    %termination,
                    "Lifecycle ended, restarting"
                );
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(context = %lifecycle.name(), error = %e, "Lifecycle failed");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    context = %lifecycle.name(),
                    error = %e,
                    "Lifecycle failed, restarting"
                );
            }
        }

        if lifecycle.report().tunnels_up > 0 {
            backoff.reset();
        }
        let delay = backoff.next_delay().unwrap_or_default();
        if !backoff.record_failure("restart") {
            backoff.reset();
        }
        if stop.sleep(delay).await {
            return Ok(Termination::Stopped);
        }
    }
}
