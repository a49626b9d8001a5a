// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional addons applied after the cluster is up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::ROLE_CONTROL_PLANE;
use crate::error::Result;
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct AddonsModule {
    skip_install_addons: bool,
    deploy_local_storage: bool,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl AddonsModule {
    #[must_use]
    pub fn new(skip_install_addons: bool, deploy_local_storage: bool) -> Self {
        Self {
            skip_install_addons,
            deploy_local_storage,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for AddonsModule {
    fn name(&self) -> &str {
        "addons"
    }

    fn slogan(&self) -> String {
        "[addons] installing cluster addons".to_string()
    }

    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(self.skip_install_addons)
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        let mut addons = Task::new("apply-addons").ignore_error().with_step(
            CommandStep::new(
                "apply-metrics-server",
                ROLE_CONTROL_PLANE,
                "kubectl --kubeconfig /etc/kubernetes/admin.conf apply -f /tmp/metrics-server.yaml",
            )
            .sudo()
            .timeout(Duration::from_secs(300)),
        );
        if self.deploy_local_storage {
            addons = addons.with_step(
                CommandStep::new(
                    "apply-local-storage",
                    ROLE_CONTROL_PLANE,
                    "kubectl --kubeconfig /etc/kubernetes/admin.conf apply -f /tmp/local-path-storage.yaml",
                )
                .sudo()
                .timeout(Duration::from_secs(300)),
            );
        }
        self.tasks = vec![addons];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}
