// SPDX-License-Identifier: MIT OR Apache-2.0

//! The top-level unit of work: a named, ordered sequence of modules.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::{Result, XmError};
use crate::pipeline::module::Module;
use crate::pipeline::result::{ModuleResult, ModuleStatus};
use crate::runtime::ClusterRuntime;

/// Ordered modules plus the per-module results of the last run.
pub struct Pipeline {
    name: String,
    modules: Vec<Box<dyn Module>>,
    results: Vec<(String, ModuleResult)>,
}

impl Pipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Append a module; modules execute strictly in insertion order.
    #[must_use]
    pub fn with_module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Results of the last [`Pipeline::start`], in registration order.
    #[must_use]
    pub fn results(&self) -> &[(String, ModuleResult)] {
        &self.results
    }

    /// Drive default → auto-assert → init for every module. Called by the
    /// factory so [`Pipeline::start`] only walks the modules.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle error, naming the module.
    pub async fn prepare(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        for module in &mut self.modules {
            let name = module.name().to_string();
            module
                .default(runtime)
                .and_then(|()| module.auto_assert(runtime))
                .map_err(|e| XmError::Module(format!("{name}: {e}")))?;
        }
        for module in &mut self.modules {
            let name = module.name().to_string();
            module
                .init(runtime)
                .await
                .map_err(|e| XmError::Module(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    /// Walk the modules: skip, run, poll until, post-hook, log status. On a
    /// critical failure without `IgnoreError` the pipeline stops with a
    /// wrapped error. The pipeline cache is released and every cached
    /// connection closed before returning.
    ///
    /// # Errors
    ///
    /// Returns the wrapped first critical module failure.
    pub async fn start(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        info!(pipeline = %self.name, modules = self.modules.len(), "pipeline starting");
        self.results.clear();
        let mut aborted: Option<XmError> = None;

        for module in &self.modules {
            let name = module.name().to_string();
            let mut result = ModuleResult::pending();

            match module.is_skip(runtime).await {
                Ok(true) => {
                    info!(module = %name, "module skipped");
                    result.skip("skipped");
                    self.results.push((name, result));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    result.record(e, true);
                    self.results.push((name.clone(), result));
                    if runtime.ignore_error() {
                        continue;
                    }
                    aborted = Some(XmError::Module(format!("{name}: is_skip failed")));
                    break;
                }
            }

            info!("{}", module.slogan());
            module.run(runtime, &mut result).await;

            if !result.is_failed() {
                drive_until(module.as_ref(), runtime, &mut result).await;
            }

            if let Err(e) = module.post_hook(runtime, &result).await {
                // post-hook failures are never critical
                warn!(module = %name, error = %e, "post hook failed");
                result.record(e, false);
            }

            if let Some(cache) = module.module_cache() {
                cache.release();
            }

            if result.is_failed() {
                error!(module = %name, status = %ModuleStatus::Failed, errors = %result.failure_summary(), "module finished");
                if runtime.ignore_error() {
                    warn!(module = %name, "continuing despite failure (ignore-errors)");
                    self.results.push((name, result));
                    continue;
                }
                let summary = result.failure_summary();
                self.results.push((name.clone(), result));
                aborted = Some(XmError::Module(format!(
                    "pipeline {} failed at module {name}: {summary}",
                    self.name
                )));
                break;
            }

            if result.status() == ModuleStatus::Pending {
                result.succeed("ok");
            }
            info!(module = %name, status = %result.status(), "module finished");
            self.results.push((name, result));
        }

        runtime.pipeline_cache().release();
        runtime.connector().close_all().await;

        match aborted {
            Some(e) => {
                error!(pipeline = %self.name, error = %e, "pipeline aborted");
                Err(e)
            }
            None => {
                info!(pipeline = %self.name, "pipeline finished");
                Ok(())
            }
        }
    }
}

/// Poll `until` every interval up to the module's budget, recording a
/// critical error on timeout or poll failure.
async fn drive_until(module: &dyn Module, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
    let (interval, timeout) = module.until_budget();
    let deadline = Instant::now() + timeout;
    loop {
        match module.until(runtime).await {
            Ok(true) => return,
            Ok(false) => {
                if Instant::now() >= deadline {
                    result.record(
                        XmError::Module(format!(
                            "{}: until condition not met within {timeout:?}",
                            module.name()
                        )),
                        true,
                    );
                    return;
                }
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                result.record(e, true);
                return;
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("modules", &self.modules.len())
            .finish()
    }
}
