// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container runtime installation and configuration on every Kubernetes
//! node.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::{KubernetesSpec, ROLE_K8S};
use crate::error::Result;
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct ContainerRuntimeModule {
    spec: KubernetesSpec,
    install_packages: bool,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl ContainerRuntimeModule {
    #[must_use]
    pub fn new(spec: KubernetesSpec, install_packages: bool) -> Self {
        Self {
            spec,
            install_packages,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for ContainerRuntimeModule {
    fn name(&self) -> &str {
        "container-runtime"
    }

    fn slogan(&self) -> String {
        format!("[container-runtime] installing {}", self.spec.container_manager)
    }

    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        // --install-packages=false means the runtime is provisioned outside
        // this tool
        Ok(!self.install_packages)
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        let manager = &self.spec.container_manager;
        self.tasks = vec![
            Task::new("install-runtime").with_step(
                CommandStep::new(
                    "install-packages",
                    ROLE_K8S,
                    format!("test -x /usr/local/bin/{manager} || tar -C / -xzf /tmp/{manager}.tar.gz"),
                )
                .sudo(),
            ),
            Task::new("configure-runtime")
                .with_step(
                    CommandStep::new(
                        "write-default-config",
                        ROLE_K8S,
                        format!(
                            "mkdir -p /etc/{manager} && {manager} config default > /etc/{manager}/config.toml"
                        ),
                    )
                    .sudo(),
                )
                .with_step(
                    CommandStep::new(
                        "enable-service",
                        ROLE_K8S,
                        format!("systemctl daemon-reload && systemctl enable --now {manager}"),
                    )
                    .sudo(),
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
