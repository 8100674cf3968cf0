//! Context and global settings models
//!
//! A context file describes one bastion target. Files are written by hand,
//! so numeric keys are accepted either as JSON numbers or numeric strings and
//! unknown keys survive a rewrite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Local port used when a context does not name one
pub const DEFAULT_LOCAL_PORT: u16 = 22;

/// Key whose presence marks an untouched sample file
pub const SAMPLE_MARKER_KEY: &str = "delete_this";

/// Default private key, relative to the home directory
pub const DEFAULT_PRIVATE_KEY: &str = "~/.ssh/id_rsa";

/// Default public key, relative to the home directory
pub const DEFAULT_PUBLIC_KEY: &str = "~/.ssh/id_rsa.pub";

/// A number that may have been written as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LenientNumber {
    /// Written as a JSON number
    Number(u64),
    /// Written as a JSON string
    Text(String),
}

impl LenientNumber {
    /// Parses the value into the requested integer type
    ///
    /// # Errors
    ///
    /// Returns the offending text when it is not a valid number for `T`.
    pub fn parse<T>(&self) -> Result<T, String>
    where
        T: FromStr + TryFrom<u64>,
    {
        match self {
            Self::Number(n) => T::try_from(*n).map_err(|_| format!("{n} is out of range")),
            Self::Text(s) => s
                .trim()
                .parse::<T>()
                .map_err(|_| format!("'{s}' is not a number")),
        }
    }
}

impl From<u64> for LenientNumber {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// One persisted bastion target configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Context {
    /// Bastion host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Bastion OCID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion_id: Option<String>,
    /// Prefix of the remote session display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_name: Option<String>,
    /// Public key uploaded to the bastion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_pub_path: Option<String>,
    /// Private key used by managed SSH sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Target private IP (port-forward sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,
    /// Local end of the forward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<LenientNumber>,
    /// Target port (port-forward sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<LenientNumber>,
    /// Session time to live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<LenientNumber>,
    /// Target resource OCID (managed SSH sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// OS user on the target resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_os_username: Option<String>,
    /// Region overriding the CLI profile default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Extra arguments appended to the ssh command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_custom_arguments: Option<String>,
    /// RFC 3339 timestamp of the last lifecycle start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time_used: Option<String>,
    /// Keys this version does not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Global settings shared by every context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalConfig {
    /// Context used when a command is given none
    #[serde(rename = "used_context", default)]
    pub used_context: Option<String>,
    /// Fallback private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Fallback public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_pub_path: Option<String>,
    /// Upper bound in seconds on waiting for a session to become active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_activation_timeout: Option<u64>,
    /// Keys this version does not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            used_context: None,
            private_key_path: Some(DEFAULT_PRIVATE_KEY.to_string()),
            ssh_pub_path: Some(DEFAULT_PUBLIC_KEY.to_string()),
            session_activation_timeout: None,
            extra: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Fills keys missing from `self` with defaults, returning true if any changed
    pub fn merge_defaults(&mut self) -> bool {
        let defaults = Self::default();
        let mut changed = false;
        if self.private_key_path.is_none() {
            self.private_key_path = defaults.private_key_path;
            changed = true;
        }
        if self.ssh_pub_path.is_none() {
            self.ssh_pub_path = defaults.ssh_pub_path;
            changed = true;
        }
        changed
    }
}

/// Everything needed to create a port-forward session and its tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardTarget {
    /// Context name
    pub context: String,
    /// Bastion OCID
    pub bastion_id: String,
    /// Bastion host
    pub host: String,
    /// Remote session display name
    pub display_name: String,
    /// Target private IP
    pub target_ip: String,
    /// Target port
    pub target_port: u16,
    /// Local end of the forward
    pub local_port: u16,
    /// Session TTL in seconds
    pub ttl_seconds: u64,
    /// Public key uploaded to the bastion
    pub public_key: PathBuf,
    /// Private key matching `public_key`
    pub private_key: PathBuf,
    /// Region override
    pub region: Option<String>,
    /// Extra ssh arguments
    pub custom_args: Option<String>,
    /// OS user, published for `attach`
    pub username: Option<String>,
}

/// Everything needed to create a managed SSH session and its tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedTarget {
    /// Context name
    pub context: String,
    /// Bastion OCID
    pub bastion_id: String,
    /// Bastion host
    pub host: String,
    /// Remote session display name
    pub display_name: String,
    /// Target resource OCID
    pub resource_id: String,
    /// OS user on the target
    pub os_username: String,
    /// Session TTL in seconds
    pub ttl_seconds: u64,
    /// Public key uploaded to the bastion
    pub public_key: PathBuf,
    /// Private key used for both ssh hops
    pub private_key: PathBuf,
    /// Region override
    pub region: Option<String>,
    /// Extra ssh arguments
    pub custom_args: Option<String>,
}

impl Context {
    /// Builds the sample written when a context is requested but missing
    #[must_use]
    pub fn sample() -> Self {
        let mut extra = BTreeMap::new();
        extra.insert(
            SAMPLE_MARKER_KEY.to_string(),
            Value::String("Remove this key once the file is filled out".to_string()),
        );
        Self {
            host: Some("host.bastion.us-phoenix-1.oci.oraclecloud.com".to_string()),
            bastion_id: Some("ocid1.bastion......".to_string()),
            default_name: Some("My super cool name".to_string()),
            ssh_pub_path: Some(DEFAULT_PUBLIC_KEY.to_string()),
            private_key_path: Some(DEFAULT_PRIVATE_KEY.to_string()),
            target_ip: Some("0.0.0.0 // required only for port-forward sessions".to_string()),
            local_port: Some(LenientNumber::Text("22".to_string())),
            target_port: Some(LenientNumber::Text(
                "22 // required only for port-forward sessions".to_string(),
            )),
            ttl: Some(LenientNumber::Text("3600".to_string())),
            resource_id: Some("ocid... // required only for managed SSH sessions".to_string()),
            resource_os_username: Some(
                "opc // required only for managed SSH sessions".to_string(),
            ),
            region: None,
            ssh_custom_arguments: None,
            last_time_used: None,
            extra,
        }
    }

    /// Returns true if the file still carries the sample marker
    #[must_use]
    pub fn has_sample_marker(&self) -> bool {
        self.extra.contains_key(SAMPLE_MARKER_KEY)
    }

    /// Local port of the forward, defaulting to 22
    ///
    /// # Errors
    ///
    /// Returns an error if `local-port` is present but not a port number.
    pub fn local_port(&self, context: &str) -> ConfigResult<u16> {
        self.local_port.as_ref().map_or(Ok(DEFAULT_LOCAL_PORT), |raw| {
            parse_number(raw, context, "local-port")
        })
    }

    /// Session display name: `<default-name>-ctx-<context>`
    #[must_use]
    pub fn display_name(&self, context: &str) -> String {
        let prefix = self.default_name.as_deref().unwrap_or("bastide");
        format!("{prefix}-ctx-{context}")
    }

    /// Resolves this context into a port-forward target
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid key, or when the
    /// public key file does not exist.
    pub fn port_forward_target(
        &self,
        context: &str,
        global: &GlobalConfig,
    ) -> ConfigResult<PortForwardTarget> {
        let bastion_id = required(self.bastion_id.as_ref(), context, "bastion-id")?;
        let host = required(self.host.as_ref(), context, "host")?;
        let target_ip = required(self.target_ip.as_ref(), context, "target-ip")?;
        let target_port = parse_number(
            required(self.target_port.as_ref(), context, "target-port")?,
            context,
            "target-port",
        )?;
        let ttl_seconds = self.ttl_seconds(context)?;
        let local_port = self.local_port(context)?;
        let public_key = self.public_key(context, global)?;
        let private_key = private_from_public(&public_key);

        Ok(PortForwardTarget {
            context: context.to_string(),
            bastion_id: bastion_id.clone(),
            host: host.clone(),
            display_name: self.display_name(context),
            target_ip: target_ip.clone(),
            target_port,
            local_port,
            ttl_seconds,
            public_key,
            private_key,
            region: self.region.clone(),
            custom_args: self.custom_args(),
            username: self.resource_os_username.clone(),
        })
    }

    /// Resolves this context into a managed SSH target
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid key, or when a
    /// key file does not exist.
    pub fn managed_target(
        &self,
        context: &str,
        global: &GlobalConfig,
    ) -> ConfigResult<ManagedTarget> {
        let bastion_id = required(self.bastion_id.as_ref(), context, "bastion-id")?;
        let host = required(self.host.as_ref(), context, "host")?;
        let resource_id = required(self.resource_id.as_ref(), context, "resource-id")?;
        let os_username = required(
            self.resource_os_username.as_ref(),
            context,
            "resource-os-username",
        )?;
        let ttl_seconds = self.ttl_seconds(context)?;
        let public_key = self.public_key(context, global)?;
        let private_raw = self
            .private_key_path
            .as_ref()
            .or(global.private_key_path.as_ref())
            .ok_or_else(|| ConfigError::MissingField {
                context: context.to_string(),
                field: "private-key-path",
            })?;
        let private_key = expand_path(private_raw);
        if !private_key.exists() {
            return Err(ConfigError::KeyNotFound {
                context: context.to_string(),
                path: private_key,
            });
        }

        Ok(ManagedTarget {
            context: context.to_string(),
            bastion_id: bastion_id.clone(),
            host: host.clone(),
            display_name: self.display_name(context),
            resource_id: resource_id.clone(),
            os_username: os_username.clone(),
            ttl_seconds,
            public_key,
            private_key,
            region: self.region.clone(),
            custom_args: self.custom_args(),
        })
    }

    fn ttl_seconds(&self, context: &str) -> ConfigResult<u64> {
        parse_number(
            required(self.ttl.as_ref(), context, "ttl")?,
            context,
            "ttl",
        )
    }

    fn public_key(&self, context: &str, global: &GlobalConfig) -> ConfigResult<PathBuf> {
        let raw = self
            .ssh_pub_path
            .as_ref()
            .or(global.ssh_pub_path.as_ref())
            .ok_or_else(|| ConfigError::MissingField {
                context: context.to_string(),
                field: "ssh-pub-path",
            })?;
        let path = expand_path(raw);
        if !path.exists() {
            return Err(ConfigError::KeyNotFound {
                context: context.to_string(),
                path,
            });
        }
        Ok(path)
    }

    fn custom_args(&self) -> Option<String> {
        self.ssh_custom_arguments
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    }
}

fn required<'a, T>(
    value: Option<&'a T>,
    context: &str,
    field: &'static str,
) -> ConfigResult<&'a T> {
    value.ok_or_else(|| ConfigError::MissingField {
        context: context.to_string(),
        field,
    })
}

fn parse_number<T>(raw: &LenientNumber, context: &str, field: &'static str) -> ConfigResult<T>
where
    T: FromStr + TryFrom<u64>,
{
    raw.parse::<T>().map_err(|reason| ConfigError::InvalidField {
        context: context.to_string(),
        field,
        reason,
    })
}

/// Expands `~` in a configured path
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

/// Derives the private key path from a `.pub` path
#[must_use]
pub fn private_from_public(public_key: &Path) -> PathBuf {
    let raw = public_key.to_string_lossy();
    raw.strip_suffix(".pub")
        .map_or_else(|| public_key.to_path_buf(), PathBuf::from)
}
