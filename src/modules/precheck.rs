// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node connectivity and environment probes, run before anything mutates
//! the hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::ROLE_ALL;
use crate::error::{Result, XmError};
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

/// Verifies every host is reachable, reports its architecture and OS, and
/// confirms passwordless-or-prompted sudo works.
pub struct PrecheckModule {
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl PrecheckModule {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

impl Default for PrecheckModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for PrecheckModule {
    fn name(&self) -> &str {
        "precheck"
    }

    fn slogan(&self) -> String {
        "[precheck] greeting nodes and probing their environment".to_string()
    }

    fn auto_assert(&self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if runtime.hosts().is_empty() {
            return Err(XmError::Validation(
                "cluster file declares no hosts".to_string(),
            ));
        }
        Ok(())
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        self.tasks = vec![
            Task::new("greet-nodes").with_step(
                CommandStep::new("probe-machine", ROLE_ALL, "uname -m && uname -r")
                    .timeout(Duration::from_secs(30)),
            ),
            Task::new("probe-os").with_step(
                CommandStep::new(
                    "read-os-release",
                    ROLE_ALL,
                    "cat /etc/os-release | head -2",
                )
                .timeout(Duration::from_secs(30)),
            ),
            Task::new("probe-sudo").with_step(
                CommandStep::new("whoami-elevated", ROLE_ALL, "whoami")
                    .sudo()
                    .timeout(Duration::from_secs(30)),
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
