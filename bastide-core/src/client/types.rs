//! Typed request and response models of the bastion session service
//!
//! Replies are decoded once at the client boundary. Field names follow the
//! service wire contract; both the SDK spelling (`lifecycle_state`) and the
//! CLI spelling (`lifecycle-state`) are accepted.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ManagedTarget, PortForwardTarget};
use crate::error::{SessionError, SessionResult};

/// Lifecycle state of a remote session
///
/// States the service may add later are kept verbatim in [`Self::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteState {
    /// Being provisioned
    Creating,
    /// Ready for tunnels
    Active,
    /// Being updated
    Updating,
    /// Deletion in progress
    Deleting,
    /// Gone
    Deleted,
    /// Provisioning failed
    Failed,
    /// Any other state reported by the service
    Other(String),
}

impl RemoteState {
    /// Returns true for a session that accepts tunnels
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true once deletion has started or finished
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Deleting | Self::Deleted)
    }
}

impl From<String> for RemoteState {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "DELETED" => Self::Deleted,
            "FAILED" => Self::Failed,
            _ => Self::Other(value),
        }
    }
}

impl From<RemoteState> for String {
    fn from(value: RemoteState) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "CREATING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Updating => write!(f, "UPDATING"),
            Self::Deleting => write!(f, "DELETING"),
            Self::Deleted => write!(f, "DELETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Target details resolved by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResourceDetails {
    /// `PORT_FORWARDING` or `MANAGED_SSH`
    #[serde(default, alias = "session-type")]
    pub session_type: Option<String>,
    /// Resolved private IP of the target
    #[serde(default, alias = "target-resource-private-ip-address")]
    pub target_resource_private_ip_address: Option<String>,
    /// Resolved target port
    #[serde(default, alias = "target-resource-port")]
    pub target_resource_port: Option<u16>,
    /// Target resource OCID (managed SSH)
    #[serde(default, alias = "target-resource-id")]
    pub target_resource_id: Option<String>,
    /// OS user on the target (managed SSH)
    #[serde(default, alias = "target-resource-operating-system-user-name")]
    pub target_resource_operating_system_user_name: Option<String>,
}

/// Bastion-side session as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Opaque session id
    pub id: String,
    /// Current lifecycle state
    #[serde(alias = "lifecycle-state")]
    pub lifecycle_state: RemoteState,
    /// Creation time
    #[serde(default, alias = "time-created")]
    pub time_created: Option<DateTime<Utc>>,
    /// Session TTL in seconds
    #[serde(default, alias = "session-ttl-in-seconds")]
    pub session_ttl_in_seconds: Option<u64>,
    /// Resolved target
    #[serde(default, alias = "target-resource-details")]
    pub target_resource_details: Option<TargetResourceDetails>,
    /// Owning bastion name
    #[serde(default, alias = "bastion-name")]
    pub bastion_name: Option<String>,
    /// Display name given at creation
    #[serde(default, alias = "display-name")]
    pub display_name: Option<String>,
}

impl RemoteSession {
    /// Returns true for a session that accepts tunnels
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle_state.is_active()
    }

    /// Seconds of TTL left at `now`, or `None` when time or TTL is unknown
    #[must_use]
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<i64> {
        let created = self.time_created?;
        let ttl = i64::try_from(self.session_ttl_in_seconds?).ok()?;
        Some(ttl - (now - created).num_seconds())
    }

    /// Target ip and port resolved by the service, when both are known
    #[must_use]
    pub fn target_endpoint(&self) -> Option<(String, u16)> {
        let details = self.target_resource_details.as_ref()?;
        Some((
            details.target_resource_private_ip_address.clone()?,
            details.target_resource_port?,
        ))
    }
}

/// Request for a port-forwarding session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardRequest {
    /// Bastion OCID
    pub bastion_id: String,
    /// Target private IP
    pub target_ip: String,
    /// Session display name
    pub display_name: String,
    /// Target port
    pub target_port: u16,
    /// Public key file uploaded to the bastion
    pub public_key: PathBuf,
    /// Session TTL in seconds
    pub ttl_seconds: u64,
    /// Region override
    pub region: Option<String>,
}

impl PortForwardRequest {
    /// Checks that every required field is filled in
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> SessionResult<()> {
        non_empty("bastion-id", &self.bastion_id)?;
        non_empty("target-ip", &self.target_ip)?;
        non_empty("display-name", &self.display_name)?;
        if self.target_port == 0 {
            return Err(SessionError::InvalidConfig("target-port is 0".to_string()));
        }
        non_zero_ttl(self.ttl_seconds)
    }
}

impl From<&PortForwardTarget> for PortForwardRequest {
    fn from(target: &PortForwardTarget) -> Self {
        Self {
            bastion_id: target.bastion_id.clone(),
            target_ip: target.target_ip.clone(),
            display_name: target.display_name.clone(),
            target_port: target.target_port,
            public_key: target.public_key.clone(),
            ttl_seconds: target.ttl_seconds,
            region: target.region.clone(),
        }
    }
}

/// Request for a managed SSH session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSshRequest {
    /// Bastion OCID
    pub bastion_id: String,
    /// Target resource OCID
    pub resource_id: String,
    /// Session display name
    pub display_name: String,
    /// OS user on the target
    pub os_username: String,
    /// Public key file uploaded to the bastion
    pub public_key: PathBuf,
    /// Session TTL in seconds
    pub ttl_seconds: u64,
    /// Region override
    pub region: Option<String>,
}

impl ManagedSshRequest {
    /// Checks that every required field is filled in
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> SessionResult<()> {
        non_empty("bastion-id", &self.bastion_id)?;
        non_empty("resource-id", &self.resource_id)?;
        non_empty("display-name", &self.display_name)?;
        non_empty("resource-os-username", &self.os_username)?;
        non_zero_ttl(self.ttl_seconds)
    }
}

impl From<&ManagedTarget> for ManagedSshRequest {
    fn from(target: &ManagedTarget) -> Self {
        Self {
            bastion_id: target.bastion_id.clone(),
            resource_id: target.resource_id.clone(),
            display_name: target.display_name.clone(),
            os_username: target.os_username.clone(),
            public_key: target.public_key.clone(),
            ttl_seconds: target.ttl_seconds,
            region: target.region.clone(),
        }
    }
}

fn non_empty(field: &str, value: &str) -> SessionResult<()> {
    if value.trim().is_empty() {
        return Err(SessionError::InvalidConfig(format!("{field} is empty")));
    }
    Ok(())
}

fn non_zero_ttl(ttl: u64) -> SessionResult<()> {
    if ttl == 0 {
        return Err(SessionError::InvalidConfig("ttl is 0".to_string()));
    }
    Ok(())
}
