//! SSH command lines for bastion tunnels

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::{ManagedTarget, PortForwardTarget};

/// Program launched for every tunnel
pub const SSH_PROGRAM: &str = "ssh";

/// Port of the bastion's own SSH endpoint
pub const BASTION_SSH_PORT: u16 = 22;

/// Options passed to every tunnel
const BASE_OPTIONS: [&str; 2] = ["-o", "ServerAliveInterval=20"];

/// Options added by `--force`: host keys are neither checked nor recorded
const FORCE_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "ServerAliveInterval=20",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// A fully formed tunnel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelCommand {
    program: String,
    args: Vec<String>,
    interactive: bool,
}

impl TunnelCommand {
    /// Creates a command from a program and argument vector
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            interactive: false,
        }
    }

    /// Runs the command on the caller's terminal instead of capturing output
    #[must_use]
    pub const fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Local port forward through a port-forwarding session
    ///
    /// `ssh -o ServerAliveInterval=20 [custom] -N -L local:ip:port -p 22
    /// <session>@<host> -vvv -i <key> [force]`. Verbose output is required to
    /// see the connected marker.
    #[must_use]
    pub fn port_forward(target: &PortForwardTarget, session_id: &str, force: bool) -> Self {
        let mut args = strings(&BASE_OPTIONS);
        args.extend(custom_args(target.custom_args.as_deref()));
        args.extend([
            "-N".to_string(),
            "-L".to_string(),
            format!(
                "{}:{}:{}",
                target.local_port, target.target_ip, target.target_port
            ),
            "-p".to_string(),
            BASTION_SSH_PORT.to_string(),
            format!("{session_id}@{}", target.host),
            "-vvv".to_string(),
            "-i".to_string(),
            path_arg(&target.private_key),
        ]);
        if force {
            args.extend(strings(&FORCE_OPTIONS));
        }
        Self::new(SSH_PROGRAM, args)
    }

    /// Interactive login through a managed SSH session
    ///
    /// The bastion hop runs as a `ProxyCommand`; the outer ssh connects to
    /// the resolved target.
    #[must_use]
    pub fn managed(
        target: &ManagedTarget,
        session_id: &str,
        target_ip: &str,
        target_port: u16,
        force: bool,
    ) -> Self {
        let key = path_arg(&target.private_key);
        let mut args = vec!["-i".to_string(), key.clone()];
        args.extend(strings(&BASE_OPTIONS));
        args.extend(custom_args(target.custom_args.as_deref()));
        if force {
            args.extend(strings(&FORCE_OPTIONS));
        }
        args.extend([
            "-o".to_string(),
            format!(
                "ProxyCommand=ssh -i {key} -W %h:%p -p {BASTION_SSH_PORT} {session_id}@{} -A",
                target.host
            ),
            "-p".to_string(),
            target_port.to_string(),
            format!("{}@{target_ip}", target.os_username),
            "-A".to_string(),
        ]);
        Self::new(SSH_PROGRAM, args).with_interactive(true)
    }

    /// Login to a forwarded local port
    #[must_use]
    pub fn attach(username: &str, local_port: u16) -> Self {
        Self::new(
            SSH_PROGRAM,
            vec![
                format!("{username}@127.0.0.1"),
                "-p".to_string(),
                local_port.to_string(),
            ],
        )
        .with_interactive(true)
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns true if the command inherits the terminal
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Command line as one shell string, quoting arguments that need it
    #[must_use]
    pub fn to_shell_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the process, either directly or through the system shell
    #[must_use]
    pub fn to_command(&self, shell: bool) -> Command {
        let mut cmd = if shell {
            let mut cmd = if cfg!(windows) {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C");
                cmd
            } else {
                let mut cmd = Command::new("sh");
                cmd.arg("-c");
                cmd
            };
            cmd.arg(self.to_shell_string());
            cmd
        } else {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args);
            cmd
        };

        if self.interactive {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn custom_args(custom: Option<&str>) -> Vec<String> {
    custom
        .map(|s| s.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%=,+~".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn forward_target() -> PortForwardTarget {
        PortForwardTarget {
            context: "db".to_string(),
            bastion_id: "ocid1.bastion".to_string(),
            host: "host.bastion.example.com".to_string(),
            display_name: "team-ctx-db".to_string(),
            target_ip: "10.0.0.5".to_string(),
            target_port: 5432,
            local_port: 15432,
            ttl_seconds: 3600,
            public_key: PathBuf::from("/keys/id.pub"),
            private_key: PathBuf::from("/keys/id"),
            region: None,
            custom_args: Some("-o  ConnectTimeout=5".to_string()),
            username: None,
        }
    }

    #[test]
    fn test_port_forward_command() {
        let cmd = TunnelCommand::port_forward(&forward_target(), "sess1", false);
        assert_eq!(
            cmd.to_shell_string(),
            "ssh -o ServerAliveInterval=20 -o ConnectTimeout=5 -N -L 15432:10.0.0.5:5432 \
             -p 22 sess1@host.bastion.example.com -vvv -i /keys/id"
        );
        assert!(!cmd.is_interactive());
    }

    #[test]
    fn test_force_relaxes_host_key_checks() {
        let cmd = TunnelCommand::port_forward(&forward_target(), "sess1", true);
        assert!(cmd.args().iter().any(|a| a == "StrictHostKeyChecking=no"));
        assert!(cmd.args().iter().any(|a| a == "UserKnownHostsFile=/dev/null"));
    }

    #[test]
    fn test_managed_command_uses_proxy() {
        let target = ManagedTarget {
            context: "vm".to_string(),
            bastion_id: "ocid1.bastion".to_string(),
            host: "host.bastion.example.com".to_string(),
            display_name: "team-ctx-vm".to_string(),
            resource_id: "ocid1.instance".to_string(),
            os_username: "opc".to_string(),
            ttl_seconds: 3600,
            public_key: PathBuf::from("/keys/id.pub"),
            private_key: PathBuf::from("/keys/id"),
            region: None,
            custom_args: None,
        };
        let cmd = TunnelCommand::managed(&target, "sess2", "10.0.1.7", 22, false);
        assert!(cmd.is_interactive());
        assert!(cmd.to_shell_string().contains(
            "'ProxyCommand=ssh -i /keys/id -W %h:%p -p 22 sess2@host.bastion.example.com -A'"
        ));
        assert!(cmd.to_shell_string().ends_with("-p 22 opc@10.0.1.7 -A"));
    }

    #[test]
    fn test_attach_command() {
        let cmd = TunnelCommand::attach("opc", 2222);
        assert_eq!(cmd.to_shell_string(), "ssh opc@127.0.0.1 -p 2222");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-arg"), "plain-arg");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
