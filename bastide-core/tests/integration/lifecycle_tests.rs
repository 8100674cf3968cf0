//! Lifecycle runs against the stub client and scripted ssh

use std::time::Duration;

use bastide_core::testing::{ScriptedLauncher, ScriptedRun, StubSessionClient};
use bastide_core::tunnel::AUTH_FAILURE_EXIT_CODE;
use bastide_core::{LifecyclePhase, RemoteState, SessionError, Termination, run_fullauto};

use super::{Env, fast_restart};

#[tokio::test]
async fn test_reaches_tunnel_up_after_activation() {
    let env = Env::new(
        StubSessionClient::new().with_activation_polls(3),
        ScriptedLauncher::new(Vec::new()).with_fallback(ScriptedRun::connected_and_hold()),
    );
    env.add_context("db", 15432);
    let lifecycle = env.lifecycle("db");
    let run = tokio::spawn(async move { lifecycle.run_once().await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while env.sink.get("db").and_then(|r| r.status).as_deref() != Some("connected") {
        assert!(tokio::time::Instant::now() < deadline, "tunnel never came up");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let record = env.sink.get("db").unwrap();
    assert_eq!(record.port, Some(15432));
    assert_eq!(record.username.as_deref(), Some("opc"));
    assert_eq!(record.region.as_deref(), Some("eu-frankfurt-1"));
    assert!(env.client.get_calls() >= 3);

    env.shutdown.kill_all(env.client.as_ref()).await;
    let termination = run.await.unwrap().unwrap();
    assert_eq!(termination, Termination::Stopped);
    assert!(env.client.live_ids().is_empty());
    assert!(env.sink.get("db").is_none());
}

#[tokio::test]
async fn test_report_tracks_connection() {
    let env = Env::new(
        StubSessionClient::new(),
        ScriptedLauncher::new(Vec::new()).with_fallback(ScriptedRun::connected_and_hold()),
    );
    env.add_context("db", 15432);
    let lifecycle = std::sync::Arc::new(env.lifecycle("db"));
    let mut report = lifecycle.subscribe();

    let run = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move { lifecycle.run_once().await }
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        report.wait_for(|r| r.connected && r.phase == LifecyclePhase::TunnelUp),
    )
    .await
    .unwrap()
    .unwrap();
    let session_id = lifecycle.report().session_id.unwrap();
    assert_eq!(env.shutdown.tracked(), vec![session_id.clone()]);

    env.shutdown.kill_all(env.client.as_ref()).await;
    assert_eq!(run.await.unwrap().unwrap(), Termination::Stopped);
    assert_eq!(env.client.state_of(&session_id), Some(RemoteState::Deleted));
    assert_eq!(lifecycle.report().phase, LifecyclePhase::Terminated);
}

#[tokio::test]
async fn test_connected_marker_resets_auth_budget() {
    let mut runs = vec![ScriptedRun::exit(AUTH_FAILURE_EXIT_CODE); 9];
    runs.push(ScriptedRun::connected_then_exit(AUTH_FAILURE_EXIT_CODE));
    runs.extend(vec![ScriptedRun::exit(AUTH_FAILURE_EXIT_CODE); 10]);
    let env = Env::new(StubSessionClient::new(), ScriptedLauncher::new(runs));
    env.add_context("db", 15432);

    let err = env.lifecycle("db").run_once().await.unwrap_err();

    assert_eq!(err.exit_code(), 255);
    assert_eq!(env.launcher.spawns(), 20);
    assert_eq!(env.client.create_calls(), 1);
    assert_eq!(env.client.deleted_ids().len(), 1);
}

#[tokio::test]
async fn test_ten_auth_failures_exhaust_budget() {
    let env = Env::new(
        StubSessionClient::new(),
        ScriptedLauncher::new(Vec::new()).with_fallback(ScriptedRun::exit(AUTH_FAILURE_EXIT_CODE)),
    );
    env.add_context("db", 15432);

    let err = run_fullauto(&env.lifecycle("db"), fast_restart())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 255);
    assert_eq!(env.launcher.spawns(), 10);
    assert!(env.client.live_ids().is_empty());
}

#[tokio::test]
async fn test_expired_ttl_recreates_session() {
    let env = Env::new(
        StubSessionClient::new().with_ttl(60).with_created_ago(120),
        ScriptedLauncher::new(vec![
            ScriptedRun::connected_then_exit(1),
            ScriptedRun::connected_then_exit(0),
        ]),
    );
    env.add_context("db", 15432);

    let termination = run_fullauto(&env.lifecycle("db"), fast_restart())
        .await
        .unwrap();

    assert_eq!(termination, Termination::UserTerminated);
    assert_eq!(env.client.create_calls(), 2);
    assert_eq!(env.client.deleted_ids().len(), 2);
}

#[tokio::test]
async fn test_remote_deletion_recreates_session() {
    let env = Env::new(
        StubSessionClient::new(),
        ScriptedLauncher::new(vec![
            ScriptedRun::connected_then_exit(1),
            ScriptedRun::connected_then_exit(0),
        ]),
    );
    env.add_context("db", 15432);
    let lifecycle = env.lifecycle("db");

    let client = env.client.clone();
    let watcher = tokio::spawn(async move {
        loop {
            if let Some(id) = client.live_ids().first() {
                client.set_state(id, RemoteState::Deleted);
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let termination = run_fullauto(&lifecycle, fast_restart()).await.unwrap();
    watcher.await.unwrap();

    assert_eq!(termination, Termination::UserTerminated);
    assert!(env.client.create_calls() >= 2);
    assert!(env.client.live_ids().is_empty());
}

#[tokio::test]
async fn test_create_failures_within_budget_succeed() {
    let env = Env::new(
        StubSessionClient::new().with_create_failures(
            2,
            SessionError::Service {
                status: Some(429),
                code: Some("TooManyRequests".to_string()),
                message: "slow down".to_string(),
            },
        ),
        ScriptedLauncher::new(vec![ScriptedRun::connected_then_exit(0)]),
    );
    env.add_context("db", 15432);

    let termination = env.lifecycle("db").run_once().await.unwrap();

    assert_eq!(termination, Termination::UserTerminated);
    assert_eq!(env.client.create_calls(), 3);
}

#[tokio::test]
async fn test_missing_context_writes_sample() {
    let env = Env::new(StubSessionClient::new(), ScriptedLauncher::new(Vec::new()));
    let err = env.lifecycle("fresh").run_once().await.unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(env.config.context_ref("fresh").path.exists());

    let again = env.lifecycle("fresh").run_once().await.unwrap_err();
    assert!(again.to_string().contains("delete_this"));
    assert_eq!(env.client.create_calls(), 0);
}
