// SPDX-License-Identifier: MIT OR Apache-2.0

//! Private image registry wiring on every Kubernetes node.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::{RegistrySpec, ROLE_K8S};
use crate::connector::shell_quote;
use crate::error::Result;
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct RegistryModule {
    spec: RegistrySpec,
    skip_push_images: bool,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl RegistryModule {
    #[must_use]
    pub fn new(spec: RegistrySpec, skip_push_images: bool) -> Self {
        Self {
            spec,
            skip_push_images,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }

    /// Hosts config fragment trusting the private registry.
    fn hosts_toml(&self) -> String {
        let registry = &self.spec.private_registry;
        let insecure = self
            .spec
            .insecure_registries
            .iter()
            .any(|r| r == registry);
        format!(
            "[host.\"{scheme}://{registry}\"]\n  capabilities = [\"pull\", \"resolve\", \"push\"]\n",
            scheme = if insecure { "http" } else { "https" },
        )
    }
}

#[async_trait]
impl Module for RegistryModule {
    fn name(&self) -> &str {
        "registry"
    }

    fn slogan(&self) -> String {
        format!("[registry] trusting {}", self.spec.private_registry)
    }

    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(self.spec.private_registry.is_empty())
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        let registry = &self.spec.private_registry;
        let dir = format!("/etc/containerd/certs.d/{registry}");
        let mut configure = Task::new("configure-registry").with_step(
            CommandStep::new(
                "write-hosts-toml",
                ROLE_K8S,
                format!(
                    "mkdir -p {dir} && printf %s {content} > {dir}/hosts.toml",
                    dir = shell_quote(&dir),
                    content = shell_quote(&self.hosts_toml()),
                ),
            )
            .sudo(),
        );
        if !self.skip_push_images {
            configure = configure.with_step(
                CommandStep::new(
                    "restart-runtime",
                    ROLE_K8S,
                    "systemctl restart containerd",
                )
                .sudo(),
            );
        }
        self.tasks = vec![configure];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts_toml_scheme_follows_insecure_list() {
        let mut spec = RegistrySpec {
            private_registry: "registry.local".to_string(),
            ..Default::default()
        };
        let module = RegistryModule::new(spec.clone(), false);
        assert!(module.hosts_toml().contains("https://registry.local"));

        spec.insecure_registries = vec!["registry.local".to_string()];
        let module = RegistryModule::new(spec, false);
        assert!(module.hosts_toml().contains("http://registry.local"));
    }
}
