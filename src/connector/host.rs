// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-machine connection parameters and role tags.
//!
//! A [`Host`] is constructed from the cluster file at pipeline factory time
//! and immutable afterwards. Steps select their targets by role; the
//! connector layer derives dial parameters from the host.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::{BastionSpec, HostSpec};
use crate::error::{Result, XmError};

/// One machine the provisioner drives.
#[derive(Debug, Clone)]
pub struct Host {
    /// Unique name within the cluster.
    pub name: String,
    /// Address the provisioner dials.
    pub address: String,
    /// Address other cluster members use; may be `"ipv4,ipv6"`.
    pub internal_address: String,
    /// SSH port; defaulted to 22 at dial time.
    pub port: Option<u16>,
    /// SSH user.
    pub user: String,
    /// Password authentication material.
    pub password: Option<String>,
    /// Inline private key text; preferred over the file path.
    pub private_key: Option<String>,
    /// Path to a private key file.
    pub private_key_path: Option<String>,
    /// SSH agent socket path; `env:NAME` resolves at dial time.
    pub agent_socket: Option<String>,
    /// Optional bastion to hop through.
    pub bastion: Option<Bastion>,
    /// Connect timeout; defaulted to 15 s at dial time.
    pub timeout: Option<Duration>,
    /// CPU architecture tag, e.g. `amd64`.
    pub arch: String,
    /// Roles selecting this host into step target sets.
    pub roles: BTreeSet<String>,
    /// Free-form per-host variables.
    pub vars: HashMap<String, String>,
    /// Per-host typed cache, shared across steps.
    pub cache: Arc<Cache>,
}

/// Bastion parameters mirroring the target authentication set.
#[derive(Debug, Clone, Default)]
pub struct Bastion {
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub private_key_path: Option<String>,
    pub agent_socket: Option<String>,
}

impl Host {
    /// Build a host from its cluster-file entry and the roles assigned to it.
    #[must_use]
    pub fn from_spec(spec: &HostSpec, roles: BTreeSet<String>) -> Self {
        Self {
            name: spec.name.clone(),
            address: spec.address.clone(),
            internal_address: spec.internal_address.clone(),
            port: spec.port,
            user: spec.user.clone(),
            password: spec.password.clone(),
            private_key: spec.private_key.clone(),
            private_key_path: spec.private_key_path.clone(),
            agent_socket: spec.agent_socket.clone(),
            bastion: spec.bastion.as_ref().map(Bastion::from_spec),
            timeout: spec.timeout.map(Duration::from_secs),
            arch: spec.arch.clone().unwrap_or_else(|| "amd64".to_string()),
            roles,
            vars: spec.vars.clone(),
            cache: Arc::new(Cache::new()),
        }
    }

    /// Stable identity: the name when set, otherwise `address:port`.
    #[must_use]
    pub fn id(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.address, self.port.unwrap_or(22))
        } else {
            self.name.clone()
        }
    }

    /// Whether the host carries a role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// First internal address (the IPv4 one when the field is `"v4,v6"`).
    #[must_use]
    pub fn internal_ipv4(&self) -> &str {
        self.internal_address
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
    }

    /// Validate the invariants the connector relies on.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the name or address is empty, the
    /// port is zero, or no authentication material is present.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(XmError::Validation("host name must not be empty".to_string()));
        }
        if self.address.is_empty() {
            return Err(XmError::Validation(format!(
                "host {}: address must not be empty",
                self.name
            )));
        }
        if self.port == Some(0) {
            return Err(XmError::Validation(format!(
                "host {}: port must be between 1 and 65535",
                self.name
            )));
        }
        if !self.internal_address.is_empty() {
            crate::util::parse_ips_from_string(&self.internal_address).map_err(|e| {
                XmError::Validation(format!("host {}: internalAddress: {e}", self.name))
            })?;
        }
        if self.password.is_none()
            && self.private_key.is_none()
            && self.private_key_path.is_none()
            && self.agent_socket.is_none()
        {
            return Err(XmError::Validation(format!(
                "host {}: no authentication method configured",
                self.name
            )));
        }
        Ok(())
    }
}

impl Bastion {
    #[must_use]
    fn from_spec(spec: &BastionSpec) -> Self {
        Self {
            address: spec.address.clone(),
            port: spec.port,
            user: spec.user.clone(),
            password: spec.password.clone(),
            private_key: spec.private_key.clone(),
            private_key_path: spec.private_key_path.clone(),
            agent_socket: spec.agent_socket.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Host {
        let spec = HostSpec {
            name: "node1".to_string(),
            address: "192.168.1.10".to_string(),
            internal_address: "10.0.0.10,fd00::10".to_string(),
            user: "root".to_string(),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        Host::from_spec(&spec, BTreeSet::from(["worker".to_string()]))
    }

    #[test]
    fn test_identity_prefers_name() {
        let host = sample();
        assert_eq!(host.id(), "node1");
    }

    #[test]
    fn test_identity_falls_back_to_endpoint() {
        let mut host = sample();
        host.name.clear();
        assert_eq!(host.id(), "192.168.1.10:22");
        host.port = Some(2222);
        assert_eq!(host.id(), "192.168.1.10:2222");
    }

    #[test]
    fn test_internal_ipv4_splits_dual_stack() {
        assert_eq!(sample().internal_ipv4(), "10.0.0.10");
    }

    #[test]
    fn test_roles() {
        let host = sample();
        assert!(host.has_role("worker"));
        assert!(!host.has_role("etcd"));
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_auth() {
        let mut host = sample();
        host.password = None;
        assert!(host.validate().is_err());
        host.agent_socket = Some("env:SSH_AUTH_SOCK".to_string());
        assert!(host.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let mut host = sample();
        host.port = Some(0);
        assert!(host.validate().is_err());
    }

    #[test]
    fn test_validate_requires_address() {
        let mut host = sample();
        host.address.clear();
        assert!(host.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_internal_address() {
        let mut host = sample();
        host.internal_address = "not-an-ip".to_string();
        assert!(host.validate().is_err());
        host.internal_address.clear();
        assert!(host.validate().is_ok());
    }
}
