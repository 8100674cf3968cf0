//! File status sink shared between processes

use bastide_core::testing::{ScriptedLauncher, ScriptedRun, StubSessionClient};
use std::sync::Arc;

use bastide_core::{
    FileStatusSink, LifecycleDeps, SessionKind, SessionLifecycle, StatusRecord, StatusSink,
};

use super::{Env, fast_timings};

#[test]
fn test_records_visible_to_second_sink() {
    let dir = tempfile::TempDir::new().unwrap();
    let writer = FileStatusSink::new(dir.path());
    let reader = FileStatusSink::new(dir.path());

    writer
        .publish("db", &StatusRecord::status("digging tunnel").with_port(5432))
        .unwrap();
    writer
        .publish("db", &StatusRecord::status("connected"))
        .unwrap();

    let all = reader.list_all().unwrap();
    let record = &all["db"];
    assert_eq!(record.status.as_deref(), Some("connected"));
    assert_eq!(record.port, Some(5432));

    reader.remove("db").unwrap();
    assert!(writer.list_all().unwrap().is_empty());
    reader.remove("db").unwrap();
}

#[tokio::test]
async fn test_entry_removed_after_termination() {
    let env = Env::new(
        StubSessionClient::new(),
        ScriptedLauncher::new(vec![ScriptedRun::connected_then_exit(0)]),
    );
    env.add_context("db", 15432);
    let sink = Arc::new(FileStatusSink::new(env.config.paths().shared_dir()));
    let deps = LifecycleDeps {
        sink: sink.clone(),
        ..env.deps()
    };
    let lifecycle = SessionLifecycle::new(
        env.config.context_ref("db"),
        SessionKind::PortForward,
        env.config.clone(),
        deps,
    )
    .with_timings(fast_timings());

    lifecycle.run_once().await.unwrap();

    assert!(sink.list_all().unwrap().is_empty());
    assert_eq!(
        std::fs::read_dir(env.config.paths().shared_dir()).unwrap().count(),
        0
    );
}
