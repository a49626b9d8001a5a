// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster file parser
//!
//! This module provides functionality to parse the declarative cluster
//! specification consumed by `xm create cluster -f <path>`.
//!
//! # Example
//!
//! ```no_run
//! use xmcores::config::ClusterFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = ClusterFile::load_from_path("cluster.yaml")?;
//! println!("cluster: {}", cluster.metadata.name);
//! for host in &cluster.spec.hosts {
//!     println!("  host: {} ({})", host.name, host.address);
//! }
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, XmError};

/// Role selecting hosts running the control plane.
pub const ROLE_CONTROL_PLANE: &str = "control-plane";
/// Legacy alias for [`ROLE_CONTROL_PLANE`].
pub const ROLE_MASTER: &str = "master";
/// Role selecting worker nodes.
pub const ROLE_WORKER: &str = "worker";
/// Role selecting etcd members.
pub const ROLE_ETCD: &str = "etcd";
/// Role selecting load-balancer hosts.
pub const ROLE_LOADBALANCER: &str = "loadbalancer";
/// Role selecting every Kubernetes node (control plane + workers).
pub const ROLE_K8S: &str = "k8s";
/// Pseudo-role selecting every host in the cluster file.
pub const ROLE_ALL: &str = "all";

/// The entire cluster file: envelope plus spec tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterFile {
    /// API version of the document, e.g. `xmcores.io/v1alpha2`.
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,

    /// Document kind, expected to be `Cluster`.
    #[serde(default)]
    pub kind: String,

    /// Object metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// The cluster specification proper.
    #[serde(default)]
    pub spec: ClusterSpec,
}

/// Object metadata; only the name is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

/// The `spec` tree of a cluster file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    /// Machines the provisioner drives.
    #[serde(default)]
    pub hosts: Vec<HostSpec>,

    /// Role name → host names.
    #[serde(rename = "roleGroups", default)]
    pub role_groups: RoleGroups,

    /// Stable endpoint in front of the control plane.
    #[serde(rename = "controlPlaneEndpoint", default)]
    pub control_plane_endpoint: ControlPlaneEndpointSpec,

    /// Kubernetes-level settings.
    #[serde(default)]
    pub kubernetes: KubernetesSpec,

    /// Etcd deployment settings.
    #[serde(default)]
    pub etcd: EtcdSpec,

    /// Pod/service networking settings.
    #[serde(default)]
    pub network: NetworkSpec,

    /// Image registry settings.
    #[serde(default)]
    pub registry: RegistrySpec,
}

/// Role groups: a map from role name to member host names.
pub type RoleGroups = HashMap<String, Vec<String>>;

/// One machine in the cluster file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostSpec {
    /// Unique name within the cluster.
    #[serde(default)]
    pub name: String,

    /// Address the provisioner dials.
    #[serde(default)]
    pub address: String,

    /// Address other cluster members use; may be `"ipv4,ipv6"`.
    #[serde(rename = "internalAddress", default)]
    pub internal_address: String,

    /// SSH port; defaults to 22 at dial time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// SSH user.
    #[serde(default)]
    pub user: String,

    /// Password authentication material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Inline private key text; takes precedence over `privateKeyPath`.
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Path to a private key file.
    #[serde(
        rename = "privateKeyPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key_path: Option<String>,

    /// SSH agent socket path; `env:NAME` resolves from the environment at
    /// dial time.
    #[serde(rename = "agentSocket", default, skip_serializing_if = "Option::is_none")]
    pub agent_socket: Option<String>,

    /// Connect timeout in seconds; defaults to 15 at dial time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// CPU architecture tag, e.g. `amd64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    /// Optional bastion to hop through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionSpec>,

    /// Free-form per-host variables available to modules.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub vars: HashMap<String, String>,
}

/// Bastion parameters mirroring the target authentication set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BastionSpec {
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(
        rename = "privateKeyPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key_path: Option<String>,
    #[serde(rename = "agentSocket", default, skip_serializing_if = "Option::is_none")]
    pub agent_socket: Option<String>,
}

/// Stable endpoint in front of the Kubernetes API servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControlPlaneEndpointSpec {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub loadbalancer: LoadBalancerSpec,
}

/// Load-balancer settings for the control-plane endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadBalancerSpec {
    #[serde(default)]
    pub enable: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Kubernetes-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "clusterName", default)]
    pub cluster_name: String,
    #[serde(rename = "autoRenewCerts", default)]
    pub auto_renew_certs: bool,
    #[serde(rename = "containerManager", default = "default_container_manager")]
    pub container_manager: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Default for KubernetesSpec {
    fn default() -> Self {
        Self {
            version: String::new(),
            cluster_name: String::new(),
            auto_renew_certs: false,
            container_manager: default_container_manager(),
            kind: String::new(),
        }
    }
}

fn default_container_manager() -> String {
    "containerd".to_string()
}

/// How etcd is deployed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EtcdType {
    /// Static-pod etcd managed by kubeadm.
    #[default]
    Kubeadm,
    /// Pre-existing etcd reachable at `endpoints`.
    External,
    /// Binary etcd installed on the etcd role group by this tool.
    Kubexm,
}

/// Etcd deployment settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EtcdSpec {
    #[serde(rename = "type", default)]
    pub kind: EtcdType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    #[serde(rename = "caFile", default)]
    pub ca_file: String,
    #[serde(rename = "certFile", default)]
    pub cert_file: String,
    #[serde(rename = "keyFile", default)]
    pub key_file: String,
}

/// Pod/service networking settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkSpec {
    #[serde(default)]
    pub plugin: String,
    #[serde(rename = "kubePodsCIDR", default)]
    pub kube_pods_cidr: String,
    #[serde(rename = "kubeServiceCIDR", default)]
    pub kube_service_cidr: String,
    #[serde(rename = "blockSize", default)]
    pub block_size: u32,
    #[serde(rename = "multusCNI", default)]
    pub multus_cni: MultusCni,
}

/// Multus meta-plugin toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MultusCni {
    #[serde(default)]
    pub enabled: bool,
}

/// Image registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistrySpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "privateRegistry", default)]
    pub private_registry: String,
    #[serde(rename = "namespaceOverride", default)]
    pub namespace_override: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub auths: HashMap<String, RegistryAuth>,
    #[serde(rename = "registryMirrors", default, skip_serializing_if = "Vec::is_empty")]
    pub registry_mirrors: Vec<String>,
    #[serde(
        rename = "insecureRegistries",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub insecure_registries: Vec<String>,
}

/// Credentials for one registry host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ClusterFile {
    /// Load a cluster file from a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is malformed YAML, or
    /// fails [`ClusterFile::validate`].
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            XmError::Config(format!(
                "Failed to read cluster file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a cluster file from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the envelope is
    /// incomplete.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(yaml)
            .map_err(|e| XmError::Config(format!("Failed to parse cluster YAML: {e}")))?;
        file.validate()?;
        Ok(file)
    }

    /// Validate the envelope. `apiVersion`, `kind` and `metadata.name` are
    /// required; everything else has defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the missing field.
    pub fn validate(&self) -> Result<()> {
        if self.api_version.is_empty() {
            return Err(XmError::Config("apiVersion is required".to_string()));
        }
        if self.kind.is_empty() {
            return Err(XmError::Config("kind is required".to_string()));
        }
        if self.metadata.name.is_empty() {
            return Err(XmError::Config("metadata.name is required".to_string()));
        }
        Ok(())
    }

    /// Host names assigned to a role, in role-group order.
    #[must_use]
    pub fn role_members(&self, role: &str) -> &[String] {
        self.spec
            .role_groups
            .get(role)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: xmcores.io/v1alpha2
kind: Cluster
metadata:
  name: demo
spec:
  hosts:
    - name: node1
      address: 192.168.1.10
      internalAddress: 10.0.0.10
      user: root
      password: secret
    - name: node2
      address: 192.168.1.11
      internalAddress: "10.0.0.11,fd00::11"
      port: 2222
      user: ops
      privateKeyPath: ~/.ssh/id_ed25519
  roleGroups:
    control-plane:
      - node1
    worker:
      - node2
    etcd:
      - node1
  controlPlaneEndpoint:
    domain: lb.kubesphere.local
    address: ""
    port: 6443
    loadbalancer:
      enable: false
      type: haproxy
  kubernetes:
    version: v1.29.2
    clusterName: demo.local
    autoRenewCerts: true
    containerManager: containerd
  etcd:
    type: kubexm
  network:
    plugin: calico
    kubePodsCIDR: 10.233.64.0/18
    kubeServiceCIDR: 10.233.0.0/18
  registry:
    privateRegistry: ""
    registryMirrors: []
"#;

    #[test]
    fn test_parse_sample() {
        let file = ClusterFile::from_yaml(SAMPLE).unwrap();
        assert_eq!(file.metadata.name, "demo");
        assert_eq!(file.spec.hosts.len(), 2);
        assert_eq!(file.spec.hosts[1].port, Some(2222));
        assert_eq!(file.spec.kubernetes.version, "v1.29.2");
        assert_eq!(file.spec.etcd.kind, EtcdType::Kubexm);
        assert_eq!(file.role_members(ROLE_CONTROL_PLANE), ["node1"]);
        assert_eq!(file.role_members("nonexistent"), Vec::<String>::new());
    }

    #[test]
    fn test_missing_api_version_is_fatal() {
        let err = ClusterFile::from_yaml("kind: Cluster\nmetadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("apiVersion"));
    }

    #[test]
    fn test_missing_kind_is_fatal() {
        let err =
            ClusterFile::from_yaml("apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("kind"));
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let err = ClusterFile::from_yaml("apiVersion: v1\nkind: Cluster\n").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_container_manager_default() {
        let file = ClusterFile::from_yaml(
            "apiVersion: v1\nkind: Cluster\nmetadata:\n  name: x\nspec: {}\n",
        )
        .unwrap();
        assert_eq!(file.spec.kubernetes.container_manager, "containerd");
        assert_eq!(file.spec.etcd.kind, EtcdType::Kubeadm);
    }

    #[test]
    fn test_registry_auths() {
        let yaml = r#"
apiVersion: v1
kind: Cluster
metadata:
  name: x
spec:
  registry:
    privateRegistry: dockerhub.kubesphere.local
    auths:
      dockerhub.kubesphere.local:
        username: admin
        password: hunter2
    insecureRegistries:
      - dockerhub.kubesphere.local
"#;
        let file = ClusterFile::from_yaml(yaml).unwrap();
        let auth = &file.spec.registry.auths["dockerhub.kubesphere.local"];
        assert_eq!(auth.username, "admin");
        assert_eq!(file.spec.registry.insecure_registries.len(), 1);
    }
}
