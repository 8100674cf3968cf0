//! Session client backed by the `oci` command line tool
//!
//! The CLI already handles request signing, profiles and regions, so this
//! client only builds argument vectors and decodes the JSON it prints.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::types::{ManagedSshRequest, PortForwardRequest, RemoteSession};
use super::SessionClient;
use crate::error::{SessionError, SessionResult};

/// Default program name
const OCI_PROGRAM: &str = "oci";

/// Reply envelope printed by the CLI
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Error body printed after `ServiceError:` on failure
#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`SessionClient`] that runs `oci bastion session ...`
#[derive(Debug, Clone)]
pub struct OciCliClient {
    program: String,
    profile: Option<String>,
    config_file: Option<PathBuf>,
}

impl Default for OciCliClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OciCliClient {
    /// Creates a client using `oci` from `PATH` and its default profile
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: OCI_PROGRAM.to_string(),
            profile: None,
            config_file: None,
        }
    }

    /// Uses a different executable
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Selects a profile of the CLI configuration
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Uses a non-default CLI configuration file
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    fn global_args(&self, region: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref profile) = self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        if let Some(ref config_file) = self.config_file {
            args.extend(["--config-file".to_string(), config_file.display().to_string()]);
        }
        if let Some(region) = region {
            args.extend(["--region".to_string(), region.to_string()]);
        }
        args
    }

    async fn run(&self, args: Vec<String>, region: Option<&str>) -> SessionResult<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .args(self.global_args(region))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program, ?args, "Running bastion CLI");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SessionError::ClientUnavailable(format!("'{}' is not installed", self.program))
            } else {
                SessionError::ClientUnavailable(format!("failed to start '{}': {e}", self.program))
            }
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(parse_service_error(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Arguments of `create-port-forwarding`
fn port_forward_args(request: &PortForwardRequest) -> Vec<String> {
    vec![
        "bastion".to_string(),
        "session".to_string(),
        "create-port-forwarding".to_string(),
        "--bastion-id".to_string(),
        request.bastion_id.clone(),
        "--display-name".to_string(),
        request.display_name.clone(),
        "--key-type".to_string(),
        "PUB".to_string(),
        "--ssh-public-key-file".to_string(),
        request.public_key.display().to_string(),
        "--target-private-ip".to_string(),
        request.target_ip.clone(),
        "--target-port".to_string(),
        request.target_port.to_string(),
        "--session-ttl".to_string(),
        request.ttl_seconds.to_string(),
    ]
}

/// Arguments of `create-managed-ssh`
fn managed_ssh_args(request: &ManagedSshRequest) -> Vec<String> {
    vec![
        "bastion".to_string(),
        "session".to_string(),
        "create-managed-ssh".to_string(),
        "--bastion-id".to_string(),
        request.bastion_id.clone(),
        "--display-name".to_string(),
        request.display_name.clone(),
        "--key-type".to_string(),
        "PUB".to_string(),
        "--ssh-public-key-file".to_string(),
        request.public_key.display().to_string(),
        "--target-resource-id".to_string(),
        request.resource_id.clone(),
        "--target-os-username".to_string(),
        request.os_username.clone(),
        "--session-ttl".to_string(),
        request.ttl_seconds.to_string(),
    ]
}

fn session_args(action: &str, session_id: &str) -> Vec<String> {
    vec![
        "bastion".to_string(),
        "session".to_string(),
        action.to_string(),
        "--session-id".to_string(),
        session_id.to_string(),
    ]
}

/// Decodes a session from CLI output, with or without the `data` envelope
fn parse_session(stdout: &str) -> SessionResult<RemoteSession> {
    serde_json::from_str::<Envelope<RemoteSession>>(stdout)
        .map(|envelope| envelope.data)
        .or_else(|_| serde_json::from_str::<RemoteSession>(stdout))
        .map_err(|e| {
            tracing::warn!(error = %e, "Undecodable bastion reply");
            SessionError::MalformedResponse(e.to_string())
        })
}

/// Maps CLI stderr to a service error
fn parse_service_error(stderr: &str) -> SessionError {
    let body = match (stderr.find('{'), stderr.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<ServiceErrorBody>(&stderr[start..=end]).ok()
        }
        _ => None,
    };

    match body {
        Some(body) => SessionError::Service {
            status: body.status,
            code: body.code,
            message: body.message.unwrap_or_else(|| stderr.trim().to_string()),
        },
        None => SessionError::Service {
            status: None,
            code: None,
            message: stderr.trim().to_string(),
        },
    }
}

#[async_trait]
impl SessionClient for OciCliClient {
    async fn create_port_forward_session(
        &self,
        request: &PortForwardRequest,
    ) -> SessionResult<RemoteSession> {
        request.validate()?;
        let stdout = self
            .run(port_forward_args(request), request.region.as_deref())
            .await?;
        parse_session(&stdout)
    }

    async fn create_managed_ssh_session(
        &self,
        request: &ManagedSshRequest,
    ) -> SessionResult<RemoteSession> {
        request.validate()?;
        let stdout = self
            .run(managed_ssh_args(request), request.region.as_deref())
            .await?;
        parse_session(&stdout)
    }

    async fn get_session(
        &self,
        session_id: &str,
        region: Option<&str>,
    ) -> SessionResult<RemoteSession> {
        let stdout = self.run(session_args("get", session_id), region).await?;
        parse_session(&stdout)
    }

    async fn delete_session(&self, session_id: &str, region: Option<&str>) -> SessionResult<()> {
        let mut args = session_args("delete", session_id);
        args.push("--force".to_string());
        match self.run(args, region).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
