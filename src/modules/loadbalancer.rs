// SPDX-License-Identifier: MIT OR Apache-2.0

//! Load balancer in front of the control-plane endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::{ControlPlaneEndpointSpec, ROLE_LOADBALANCER};
use crate::error::Result;
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

/// Installs the configured balancer on the loadbalancer role group. With
/// the feature disabled or no hosts in the group, the module is skipped,
/// never failed.
pub struct LoadBalancerModule {
    spec: ControlPlaneEndpointSpec,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl LoadBalancerModule {
    #[must_use]
    pub fn new(spec: ControlPlaneEndpointSpec) -> Self {
        Self {
            spec,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for LoadBalancerModule {
    fn name(&self) -> &str {
        "loadbalancer"
    }

    fn slogan(&self) -> String {
        format!(
            "[loadbalancer] fronting {}:{} with {}",
            self.spec.domain, self.spec.port, self.spec.loadbalancer.kind
        )
    }

    async fn is_skip(&self, runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(!self.spec.loadbalancer.enable
            || runtime.hosts_by_role(ROLE_LOADBALANCER).is_empty())
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        let kind = if self.spec.loadbalancer.kind.is_empty() {
            "haproxy"
        } else {
            &self.spec.loadbalancer.kind
        };
        self.tasks = vec![Task::new("install-balancer")
            .with_step(
                CommandStep::new(
                    "install-package",
                    ROLE_LOADBALANCER,
                    format!("command -v {kind} >/dev/null || apt-get install -y {kind} || yum install -y {kind}"),
                )
                .sudo(),
            )
            .with_step(
                CommandStep::new(
                    "enable-service",
                    ROLE_LOADBALANCER,
                    format!("systemctl enable --now {kind}"),
                )
                .sudo(),
            )];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}
