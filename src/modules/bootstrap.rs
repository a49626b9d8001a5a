// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane bootstrap: `kubeadm init` on the first control-plane host.
//!
//! The module's until hook waits for the bootstrap node to report Ready, so
//! later modules can assume a working API server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::Cache;
use crate::config::{ControlPlaneEndpointSpec, KubernetesSpec, NetworkSpec, ROLE_CONTROL_PLANE};
use crate::error::{Result, XmError};
use crate::pipeline::{init_tasks, run_tasks, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct BootstrapModule {
    kubernetes: KubernetesSpec,
    endpoint: ControlPlaneEndpointSpec,
    network: NetworkSpec,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl BootstrapModule {
    #[must_use]
    pub fn new(
        kubernetes: KubernetesSpec,
        endpoint: ControlPlaneEndpointSpec,
        network: NetworkSpec,
    ) -> Self {
        Self {
            kubernetes,
            endpoint,
            network,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }

    fn init_command(&self) -> String {
        let mut cmd = format!(
            "test -f /etc/kubernetes/admin.conf || kubeadm init \
             --kubernetes-version {} --pod-network-cidr {} --service-cidr {}",
            self.kubernetes.version, self.network.kube_pods_cidr, self.network.kube_service_cidr
        );
        if !self.endpoint.domain.is_empty() {
            cmd.push_str(&format!(
                " --control-plane-endpoint {}:{}",
                self.endpoint.domain, self.endpoint.port
            ));
        }
        cmd
    }
}

#[async_trait]
impl Module for BootstrapModule {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn slogan(&self) -> String {
        format!(
            "[bootstrap] initializing Kubernetes {} control plane",
            self.kubernetes.version
        )
    }

    fn auto_assert(&self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.kubernetes.version.is_empty() {
            return Err(XmError::Validation(
                "kubernetes.version is required".to_string(),
            ));
        }
        if runtime.first_host_by_role(ROLE_CONTROL_PLANE).is_none() {
            return Err(XmError::Validation(
                "the control-plane role group is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        // kubeadm init must run on exactly one node; the bootstrap host is
        // the first control-plane member.
        let bootstrap = runtime
            .first_host_by_role(ROLE_CONTROL_PLANE)
            .ok_or_else(|| {
                XmError::Validation("the control-plane role group is empty".to_string())
            })?;
        self.cache.set("bootstrap-host", bootstrap.id());

        self.tasks = vec![
            Task::new("kubeadm-init").with_step(
                FirstHostCommand::new("kubeadm-init", self.init_command())
                    .timeout(Duration::from_secs(600)),
            ),
            Task::new("collect-kubeconfig").with_step(FirstHostCommand::new(
                "copy-admin-conf",
                "mkdir -p $HOME/.kube && cp -f /etc/kubernetes/admin.conf $HOME/.kube/config",
            )),
        ];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    async fn until(&self, runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        let Some(host) = runtime.first_host_by_role(ROLE_CONTROL_PLANE) else {
            return Ok(true);
        };
        let cancel = runtime.call_ctx(Some(Duration::from_secs(30)));
        let runner = runtime.runner_for(&host).await?;
        let out = runner
            .sudo_run(
                &cancel,
                "kubectl --kubeconfig /etc/kubernetes/admin.conf get nodes --no-headers",
            )
            .await?;
        let ready = out.success() && out.stdout.contains(" Ready");
        debug!(host = %host.id(), ready, "bootstrap readiness probe");
        Ok(ready)
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}

/// Runs a command on the first control-plane host only.
struct FirstHostCommand {
    name: String,
    command: String,
    timeout: Option<Duration>,
}

impl FirstHostCommand {
    fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout: None,
        }
    }

    fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl crate::pipeline::Step for FirstHostCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(XmError::Validation(format!(
                "step {}: command must not be empty",
                self.name
            )));
        }
        Ok(())
    }

    async fn execute(&self, runtime: &Arc<ClusterRuntime>) -> crate::pipeline::StepReport {
        use crate::pipeline::{combine, HostOutcome, StepReport};

        let Some(host) = runtime.first_host_by_role(ROLE_CONTROL_PLANE) else {
            return StepReport::failed(
                String::new(),
                XmError::Validation("no control-plane host".to_string()),
            );
        };
        let cancel = runtime.call_ctx(self.timeout);
        let outcome = match runtime.runner_for(&host).await {
            Ok(runner) => match runner.sudo_run(&cancel, &self.command).await {
                Ok(out) => match out.check(&self.command) {
                    Ok(out) => HostOutcome::ok(host.id(), out.stdout),
                    Err(e) => HostOutcome::err(host.id(), e),
                },
                Err(e) => HostOutcome::err(host.id(), e),
            },
            Err(e) => HostOutcome::err(host.id(), e),
        };
        combine(&self.name, &[outcome])
    }
}
