// SPDX-License-Identifier: MIT OR Apache-2.0

//! CNI plugin deployment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::NetworkSpec;
use crate::error::{Result, XmError};
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct NetworkModule {
    spec: NetworkSpec,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(spec: NetworkSpec) -> Self {
        Self {
            spec,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for NetworkModule {
    fn name(&self) -> &str {
        "network"
    }

    fn slogan(&self) -> String {
        format!("[network] deploying the {} CNI plugin", self.spec.plugin)
    }

    fn auto_assert(&self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.spec.plugin.is_empty() {
            return Err(XmError::Validation("network.plugin is required".to_string()));
        }
        for cidr in [&self.spec.kube_pods_cidr, &self.spec.kube_service_cidr] {
            if !cidr.is_empty() && !cidr.contains('/') {
                return Err(XmError::Validation(format!("not a CIDR block: {cidr}")));
            }
        }
        Ok(())
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        let manifest = format!("/tmp/cni-{}.yaml", self.spec.plugin);
        let mut apply = Task::new("apply-cni").with_step(
            CommandStep::new(
                "kubectl-apply",
                "control-plane",
                format!(
                    "kubectl --kubeconfig /etc/kubernetes/admin.conf apply -f {manifest}"
                ),
            )
            .sudo()
            .timeout(Duration::from_secs(300)),
        );
        if self.spec.multus_cni.enabled {
            apply = apply.with_step(
                CommandStep::new(
                    "kubectl-apply-multus",
                    "control-plane",
                    "kubectl --kubeconfig /etc/kubernetes/admin.conf apply -f /tmp/multus-daemonset.yaml",
                )
                .sudo()
                .timeout(Duration::from_secs(300)),
            );
        }
        self.tasks = vec![apply];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}
