//! Coordinated deletion of tracked sessions

use std::time::Duration;

use bastide_core::testing::{ScriptedLauncher, StubSessionClient};
use bastide_core::{DeletePolicy, ShutdownContext};

#[tokio::test]
async fn test_kill_all_deletes_each_session_once() {
    let client = StubSessionClient::new().with_delete_delay(Duration::from_millis(20));
    let shutdown = ShutdownContext::new().with_concurrency(4);
    for i in 0..12 {
        let id = format!("ocid1.bastionsession.seed.{i}");
        client.seed_active(&id);
        shutdown.register(&id, Some("eu-frankfurt-1"));
    }

    let (first, second) = tokio::join!(shutdown.kill_all(&client), shutdown.kill_all(&client));

    assert_eq!(first.total() + second.total(), 12);
    assert_eq!(client.deleted_ids().len(), 12);
    assert_eq!(client.delete_calls(), 12);
    assert!(shutdown.tracked().is_empty());
    assert!(shutdown.is_stopped());
}

#[tokio::test]
async fn test_kill_all_is_idempotent() {
    let client = StubSessionClient::new();
    let shutdown = ShutdownContext::new();
    client.seed_active("s1");
    shutdown.register("s1", None);

    let first = shutdown.kill_all(&client).await;
    let second = shutdown.kill_all(&client).await;

    assert_eq!(first.deleted, vec!["s1".to_string()]);
    assert_eq!(second.total(), 0);
    assert_eq!(client.delete_calls(), 1);
}

#[tokio::test]
async fn test_transient_delete_failures_are_retried() {
    let client = StubSessionClient::new().with_delete_failures(2);
    let shutdown = ShutdownContext::new().with_delete_policy(DeletePolicy {
        max_attempts: 5,
        interval: Duration::from_millis(1),
    });
    client.seed_active("s1");
    shutdown.register("s1", None);

    let report = shutdown.kill_all(&client).await;

    assert_eq!(report.deleted.len(), 1);
    assert_eq!(client.delete_calls(), 3);
}

#[tokio::test]
async fn test_stop_reaches_waiting_lifecycle() {
    let env = super::Env::new(
        StubSessionClient::new().with_activation_polls(usize::MAX),
        ScriptedLauncher::new(Vec::new()),
    );
    env.add_context("db", 15432);
    let lifecycle = env.lifecycle("db");
    let run = tokio::spawn(async move { lifecycle.run_once().await });

    while env.shutdown.tracked().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let report = env.shutdown.kill_all(env.client.as_ref()).await;
    let termination = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(termination, bastide_core::Termination::Stopped);
    assert_eq!(report.deleted.len(), 1);
    assert!(env.client.live_ids().is_empty());
    assert_eq!(env.launcher.spawns(), 0);
}
