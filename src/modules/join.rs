// SPDX-License-Identifier: MIT OR Apache-2.0

//! Joins the remaining control-plane hosts and the workers to the cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::{KubernetesSpec, ROLE_CONTROL_PLANE, ROLE_WORKER};
use crate::error::Result;
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct JoinModule {
    kubernetes: KubernetesSpec,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl JoinModule {
    #[must_use]
    pub fn new(kubernetes: KubernetesSpec) -> Self {
        Self {
            kubernetes,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for JoinModule {
    fn name(&self) -> &str {
        "join"
    }

    fn slogan(&self) -> String {
        format!(
            "[join] joining nodes to the {} cluster",
            self.kubernetes.cluster_name
        )
    }

    async fn is_skip(&self, runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        // nothing to join in a single-node cluster
        Ok(runtime.hosts_by_role(ROLE_WORKER).is_empty()
            && runtime.hosts_by_role(ROLE_CONTROL_PLANE).len() <= 1)
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        // The join command files are produced by kubeadm init and distributed
        // out of band; a node that already carries the relevant kubeconfig is
        // part of the cluster and the join is a no-op. That also keeps the
        // bootstrap host out of the control-plane fan-out.
        self.tasks = vec![
            Task::new("join-control-planes").with_step(
                CommandStep::new(
                    "kubeadm-join-control-plane",
                    ROLE_CONTROL_PLANE,
                    "test -f /etc/kubernetes/admin.conf || bash /tmp/kubeadm-join-control-plane.sh",
                )
                .sudo()
                .timeout(Duration::from_secs(600)),
            ),
            Task::new("join-workers").with_step(
                CommandStep::new(
                    "kubeadm-join",
                    ROLE_WORKER,
                    "test -f /etc/kubernetes/kubelet.conf || bash /tmp/kubeadm-join.sh",
                )
                .sudo()
                .timeout(Duration::from_secs(600)),
            ),
        ];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}
