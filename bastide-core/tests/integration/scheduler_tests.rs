//! Parallel runs of a stack and of a set

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bastide_core::testing::{ScriptedLauncher, ScriptedRun, StubSessionClient};
use bastide_core::{RunPlan, Scheduler, Stack, StackError, StatusSink, Termination};

use super::{Env, fast_restart, fast_timings, write_context};

fn scheduler(env: &Env) -> Scheduler {
    Scheduler::new(env.config.clone(), env.deps())
        .with_timings(fast_timings())
        .with_restart(fast_restart())
}

fn holding_env() -> Env {
    Env::new(
        StubSessionClient::new(),
        ScriptedLauncher::new(Vec::new()).with_fallback(ScriptedRun::connected_and_hold()),
    )
}

fn plan() -> RunPlan {
    RunPlan::default()
        .with_tick(Duration::from_millis(5))
        .with_grace(Duration::from_secs(2))
}

#[tokio::test]
async fn test_stop_deletes_every_session() {
    let env = holding_env();
    let mut stack = Stack::load(&env.config).unwrap();
    for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
        env.add_context(name, 20000 + i as u16);
        stack.add(&env.config, name).unwrap();
    }
    let scheduler = scheduler(&env);
    let stop = env.shutdown.signal().clone();
    let ticks = Arc::new(AtomicUsize::new(0));
    let seen = ticks.clone();

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler.run(&plan(), move |rows| {
            seen.fetch_add(1, Ordering::SeqCst);
            if rows.len() == 3 && rows.iter().all(|r| r.connected) {
                stop.stop();
            }
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(ticks.load(Ordering::SeqCst) > 0);
    assert_eq!(summary.workers.len(), 3);
    assert_eq!(summary.killed.deleted.len(), 3);
    assert!(summary.killed.failed.is_empty());
    assert_eq!(env.client.create_calls(), 3);
    assert_eq!(env.client.deleted_ids().len(), 3);
    assert!(env.client.live_ids().is_empty());
    assert!(env.sink.list_all().unwrap().is_empty());
    for worker in &summary.workers {
        assert!(matches!(worker.result, Some(Ok(Termination::Stopped))));
    }
}

#[tokio::test]
async fn test_worker_failure_does_not_stop_siblings() {
    let env = holding_env();
    env.add_context("good", 20001);
    // A context without the required keys fails with a fatal config error
    bastide_core::config::write_json(
        &env.config.context_ref("broken").path,
        &serde_json::json!({ "local-port": "20002" }),
    )
    .unwrap();
    let mut stack = Stack::load(&env.config).unwrap();
    stack.add(&env.config, "good").unwrap();
    stack.add(&env.config, "broken").unwrap();

    let scheduler = scheduler(&env);
    let stop = env.shutdown.signal().clone();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler.run(&plan(), move |rows| {
            if rows.iter().any(|r| r.name == "good" && r.connected) {
                stop.stop();
            }
        }),
    )
    .await
    .unwrap()
    .unwrap();

    let failed: Vec<&str> = summary.failed().map(|w| w.name.as_str()).collect();
    assert_eq!(failed, vec!["broken"]);
    assert_eq!(env.client.deleted_ids().len(), 1);
}

#[tokio::test]
async fn test_set_directory_run() {
    let env = holding_env();
    let set_dir = bastide_core::scheduler::create_set(&env.config, "prod").unwrap();
    write_context(&set_dir.join("db.json"), env.dir.path(), 25432);
    write_context(&set_dir.join("cache.json"), env.dir.path(), 26379);
    std::fs::write(set_dir.join(".hidden.json"), "{}").unwrap();

    let scheduler = scheduler(&env);
    let names: Vec<String> = scheduler
        .members(Some(set_dir.as_path()))
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["cache", "db"]);

    let stop = env.shutdown.signal().clone();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler.run(
            &plan().with_set_dir(Some(set_dir)).with_force(true),
            move |rows| {
                if rows.iter().all(|r| r.connected) {
                    stop.stop();
                }
            },
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.killed.deleted.len(), 2);
    let commands = env.launcher.commands();
    assert!(
        commands
            .iter()
            .all(|c| c.to_shell_string().contains("StrictHostKeyChecking=no"))
    );
}

#[tokio::test]
async fn test_empty_stack_is_an_error() {
    let env = holding_env();
    let err = scheduler(&env).run(&plan(), |_| {}).await.unwrap_err();
    assert!(matches!(err, StackError::EmptyStack));
    assert_eq!(env.client.create_calls(), 0);
}

#[test]
fn test_port_collision_leaves_stack_unchanged() {
    let env = holding_env();
    env.add_context("first", 30000);
    env.add_context("second", 30000);
    env.add_context("third", 30001);

    let mut stack = Stack::load(&env.config).unwrap();
    stack.add(&env.config, "first").unwrap();
    let err = stack.add(&env.config, "second").unwrap_err();
    assert!(err.to_string().contains("first"));
    stack.add(&env.config, "third").unwrap();

    let stored = Stack::load(&env.config).unwrap();
    assert_eq!(stored.members().collect::<Vec<_>>(), vec!["first", "third"]);
}
