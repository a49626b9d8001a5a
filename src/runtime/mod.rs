// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared execution state for a pipeline run.
//!
//! The [`ClusterRuntime`] owns the parsed cluster file, the host list and
//! role map, the connection cache, the pipeline-scoped value cache and the
//! root cancellation token. Every layer of the orchestration hierarchy holds
//! a reference to the runtime and nothing else above it.

pub mod logging;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::Cache;
use crate::config::{
    ClusterFile, ROLE_ALL, ROLE_CONTROL_PLANE, ROLE_K8S, ROLE_MASTER, ROLE_WORKER,
};
use crate::connector::{ConnectorCache, Host, Runner, SudoPolicy};
use crate::error::{Result, XmError};

/// Default working directory for downloaded artifacts and logs.
pub const DEFAULT_WORK_DIR: &str = "./.xm_work_data";

/// Operational arguments taken from the CLI.
#[derive(Debug, Clone)]
pub struct Args {
    pub work_dir: PathBuf,
    pub ignore_errors: bool,
    pub artifact: Option<String>,
    pub skip_push_images: bool,
    pub deploy_local_storage: bool,
    pub install_packages: bool,
    pub skip_pull_images: bool,
    pub security_enhancement: bool,
    pub skip_install_addons: bool,
    pub sudo: SudoPolicy,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            ignore_errors: false,
            artifact: None,
            skip_push_images: false,
            deploy_local_storage: false,
            install_packages: true,
            skip_pull_images: false,
            security_enhancement: false,
            skip_install_addons: false,
            sudo: SudoPolicy::default(),
        }
    }
}

/// Holds everything a pipeline run shares.
pub struct ClusterRuntime {
    cluster: ClusterFile,
    args: Args,
    hosts: RwLock<Vec<Host>>,
    roles: RwLock<HashMap<String, Vec<Host>>>,
    connector: ConnectorCache,
    cache: Cache,
    cancel: CancellationToken,
}

impl ClusterRuntime {
    /// Build the runtime from a parsed cluster file: construct and validate
    /// every host, derive the role map and create the working directory.
    ///
    /// # Errors
    ///
    /// Returns the first host validation error, an unknown role-group
    /// member, or a working-directory creation failure.
    pub fn new(cluster: ClusterFile, args: Args) -> Result<Arc<Self>> {
        let cancel = CancellationToken::new();
        let mut hosts = Vec::with_capacity(cluster.spec.hosts.len());
        for spec in &cluster.spec.hosts {
            let host = Host::from_spec(spec, assigned_roles(&cluster, &spec.name));
            host.validate()?;
            hosts.push(host);
        }

        let mut roles: HashMap<String, Vec<Host>> = HashMap::new();
        for (role, members) in &cluster.spec.role_groups {
            let mut group = Vec::with_capacity(members.len());
            for name in members {
                let host = hosts
                    .iter()
                    .find(|h| &h.name == name)
                    .ok_or_else(|| {
                        XmError::Config(format!("role group {role} references unknown host {name}"))
                    })?
                    .clone();
                group.push(host);
            }
            roles.insert(role.clone(), group);
        }

        std::fs::create_dir_all(&args.work_dir).map_err(|e| {
            XmError::Config(format!(
                "Failed to create work dir {}: {e}",
                args.work_dir.display()
            ))
        })?;

        let connector = ConnectorCache::new(args.sudo.clone(), cancel.child_token());
        debug!(cluster = %cluster.metadata.name, hosts = hosts.len(), "runtime constructed");
        Ok(Arc::new(Self {
            cluster,
            args,
            hosts: RwLock::new(hosts),
            roles: RwLock::new(roles),
            connector,
            cache: Cache::new(),
            cancel,
        }))
    }

    /// The parsed cluster file.
    #[must_use]
    pub fn cluster(&self) -> &ClusterFile {
        &self.cluster
    }

    /// Operational arguments.
    #[must_use]
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Working directory for artifacts and logs.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.args.work_dir
    }

    /// Whether critical errors are downgraded to logged warnings.
    #[must_use]
    pub fn ignore_error(&self) -> bool {
        self.args.ignore_errors
    }

    /// Every host of the cluster.
    #[must_use]
    pub fn hosts(&self) -> Vec<Host> {
        self.hosts.read().expect("hosts lock poisoned").clone()
    }

    /// Hosts carrying a role, in role-group order. The `k8s` role resolves
    /// to every Kubernetes node and the `all` pseudo-role to every host.
    #[must_use]
    pub fn hosts_by_role(&self, role: &str) -> Vec<Host> {
        if role == ROLE_ALL {
            return self.hosts();
        }
        if role == ROLE_K8S {
            let roles = self.roles.read().expect("roles lock poisoned");
            if !roles.contains_key(ROLE_K8S) {
                let mut seen = BTreeSet::new();
                let mut nodes = Vec::new();
                for group in [ROLE_CONTROL_PLANE, ROLE_MASTER, ROLE_WORKER] {
                    for host in roles.get(group).into_iter().flatten() {
                        if seen.insert(host.id()) {
                            nodes.push(host.clone());
                        }
                    }
                }
                return nodes;
            }
        }
        self.roles
            .read()
            .expect("roles lock poisoned")
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    /// First host of a role group, typically the bootstrap node.
    #[must_use]
    pub fn first_host_by_role(&self, role: &str) -> Option<Host> {
        self.hosts_by_role(role).into_iter().next()
    }

    /// The connection cache.
    #[must_use]
    pub fn connector(&self) -> &ConnectorCache {
        &self.connector
    }

    /// The pipeline-scoped value cache.
    #[must_use]
    pub fn pipeline_cache(&self) -> &Cache {
        &self.cache
    }

    /// The root cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Derive a per-call token, optionally cancelled after a deadline.
    /// Cancelling it does not affect sibling calls.
    #[must_use]
    pub fn call_ctx(&self, timeout: Option<Duration>) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(timeout) = timeout {
            let timed = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timed.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => timed.cancel(),
                }
            });
        }
        token
    }

    /// A [`Runner`] bound to the host's cached connection.
    ///
    /// # Errors
    ///
    /// Returns the dial error on a failed connection attempt.
    pub async fn runner_for(&self, host: &Host) -> Result<Runner> {
        Ok(Runner::new(self.connector.get(host).await?))
    }

    /// Cancel the root scope; every connection supervisor closes its active
    /// sessions.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClusterRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRuntime")
            .field("cluster", &self.cluster.metadata.name)
            .finish_non_exhaustive()
    }
}

/// Roles assigned to a host by the role groups, with the aliases resolved:
/// `master` members also count as `control-plane`, and every Kubernetes node
/// carries `k8s`.
fn assigned_roles(cluster: &ClusterFile, host_name: &str) -> BTreeSet<String> {
    let mut roles = BTreeSet::new();
    for (role, members) in &cluster.spec.role_groups {
        if members.iter().any(|m| m == host_name) {
            roles.insert(role.clone());
        }
    }
    if roles.contains(ROLE_MASTER) {
        roles.insert(ROLE_CONTROL_PLANE.to_string());
    }
    if roles.contains(ROLE_CONTROL_PLANE) || roles.contains(ROLE_WORKER) {
        roles.insert(ROLE_K8S.to_string());
    }
    roles
}
