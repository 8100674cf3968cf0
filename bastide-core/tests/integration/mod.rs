//! Shared fixture for the integration tests

mod lifecycle_tests;
mod scheduler_tests;
mod shutdown_tests;
mod status_tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bastide_core::config::write_json;
use bastide_core::testing::{ScriptedLauncher, StubSessionClient};
use bastide_core::{
    ConfigManager, LifecycleDeps, LifecycleTimings, MemoryStatusSink, RetryConfig,
    SessionKind, SessionLifecycle, ShutdownContext,
};
use tempfile::TempDir;

/// Config directory with key files and context files
pub struct Env {
    pub dir: TempDir,
    pub config: ConfigManager,
    pub client: Arc<StubSessionClient>,
    pub launcher: Arc<ScriptedLauncher>,
    pub sink: Arc<MemoryStatusSink>,
    pub shutdown: ShutdownContext,
}

impl Env {
    pub fn new(client: StubSessionClient, launcher: ScriptedLauncher) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::with_config_dir(dir.path().join("bastide"));
        config.ensure_layout().unwrap();
        std::fs::write(dir.path().join("id_ed25519.pub"), "ssh-ed25519 AAAA test").unwrap();
        std::fs::write(dir.path().join("id_ed25519"), "PRIVATE").unwrap();
        Self {
            dir,
            config,
            client: Arc::new(client),
            launcher: Arc::new(launcher),
            sink: Arc::new(MemoryStatusSink::new()),
            shutdown: ShutdownContext::new(),
        }
    }

    /// Writes a complete port-forward context
    pub fn add_context(&self, name: &str, local_port: u16) {
        write_context(&self.config.context_ref(name).path, self.dir.path(), local_port);
    }

    pub fn deps(&self) -> LifecycleDeps {
        LifecycleDeps {
            client: self.client.clone(),
            launcher: self.launcher.clone(),
            sink: self.sink.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn lifecycle(&self, name: &str) -> SessionLifecycle {
        SessionLifecycle::new(
            self.config.context_ref(name),
            SessionKind::PortForward,
            self.config.clone(),
            self.deps(),
        )
        .with_timings(fast_timings())
        .with_create_retry(fast_retry())
    }
}

/// Writes a port-forward context file at `path` using the keys in `keys_dir`
pub fn write_context(path: &Path, keys_dir: &Path, local_port: u16) {
    write_json(
        path,
        &serde_json::json!({
            "host": "host.bastion.eu-frankfurt-1.oci.oraclecloud.com",
            "bastion-id": "ocid1.bastion.oc1.eu-frankfurt-1.test",
            "default-name": "it",
            "ssh-pub-path": keys_dir.join("id_ed25519.pub").display().to_string(),
            "target-ip": "10.0.0.10",
            "target-port": "5432",
            "local-port": local_port.to_string(),
            "ttl": "10800",
            "resource-os-username": "opc",
            "region": "eu-frankfurt-1",
        }),
    )
    .unwrap();
}

pub fn fast_timings() -> LifecycleTimings {
    LifecycleTimings::uniform(Duration::from_millis(1))
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig::session_create()
        .with_initial_delay_ms(1)
        .with_max_delay_ms(1)
}

pub fn fast_restart() -> RetryConfig {
    RetryConfig::fullauto()
        .with_initial_delay_ms(1)
        .with_max_delay_ms(5)
}
