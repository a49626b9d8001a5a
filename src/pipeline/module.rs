// SPDX-License-Identifier: MIT OR Apache-2.0

//! One major stage of a pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::error::Result;
use crate::pipeline::result::ModuleResult;
use crate::pipeline::task::Task;
use crate::runtime::ClusterRuntime;

/// How often the pipeline polls `until`, and for how long.
pub const UNTIL_INTERVAL: Duration = Duration::from_secs(5);
pub const UNTIL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Lifecycle contract of a pipeline stage.
///
/// The factory drives `default` → `auto_assert` → `init` for every module
/// before the pipeline starts; `Pipeline::start` then drives `is_skip` →
/// `run` → `until` → `post_hook`.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// One-line banner logged before the module runs.
    fn slogan(&self) -> String {
        format!("[{}]", self.name())
    }

    /// Store references and derived settings. No remote work.
    fn default(&mut self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        Ok(())
    }

    /// Pure validation, no side effects.
    fn auto_assert(&self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        Ok(())
    }

    /// Assemble child tasks and run their default/auto-assert/init in order.
    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()>;

    /// Evaluated before run.
    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(false)
    }

    /// Execute the module's tasks, recording into the shared result.
    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult);

    /// Polled by the pipeline after run for asynchronous completion.
    /// `Ok(true)` means done.
    async fn until(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(true)
    }

    /// Poll interval and budget for the until loop.
    fn until_budget(&self) -> (Duration, Duration) {
        (UNTIL_INTERVAL, UNTIL_TIMEOUT)
    }

    /// Invoked unconditionally after the until loop, regardless of status.
    async fn post_hook(
        &self,
        _runtime: &Arc<ClusterRuntime>,
        _result: &ModuleResult,
    ) -> Result<()> {
        Ok(())
    }

    /// The per-execution module cache, released by the pipeline after the
    /// module returns.
    fn module_cache(&self) -> Option<&Arc<Cache>> {
        None
    }
}

/// Shared task-runner: tasks execute in insertion order, stopping at the
/// first critical failure unless errors are ignored.
pub async fn run_tasks(tasks: &[Task], runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
    for task in tasks {
        if task.is_skip(runtime) {
            continue;
        }
        task.run(runtime, result).await;
        if result.is_failed() && !runtime.ignore_error() {
            return;
        }
    }
}

/// Bind, assert and init a module's tasks in order. The common body of most
/// `Module::init` implementations.
pub async fn init_tasks(
    tasks: &mut [Task],
    module_cache: &Arc<Cache>,
    runtime: &Arc<ClusterRuntime>,
) -> Result<()> {
    for task in tasks.iter_mut() {
        task.bind(module_cache);
        task.auto_assert(runtime)?;
        task.init(runtime).await?;
    }
    Ok(())
}
