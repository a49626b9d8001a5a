// SPDX-License-Identifier: MIT OR Apache-2.0

//! A coherent group of steps sharing a per-task cache.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::{Result, XmError};
use crate::pipeline::result::ModuleResult;
use crate::pipeline::step::Step;
use crate::runtime::ClusterRuntime;

/// Ordered list of steps with a per-step summary and IgnoreError policy.
pub struct Task {
    name: String,
    ignore_error: bool,
    steps: Vec<Box<dyn Step>>,
    module_cache: Option<Arc<Cache>>,
    cache: Arc<Cache>,
}

impl Task {
    /// An empty task.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignore_error: false,
            steps: Vec::new(),
            module_cache: None,
            cache: Arc::new(Cache::new()),
        }
    }

    /// Append a step; steps execute strictly in insertion order.
    #[must_use]
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Let step failures continue to the next step.
    #[must_use]
    pub fn ignore_error(mut self) -> Self {
        self.ignore_error = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-task cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Store the module-cache reference. Called by the owning module during
    /// its init.
    pub fn bind(&mut self, module_cache: &Arc<Cache>) {
        self.module_cache = Some(Arc::clone(module_cache));
    }

    /// Pure validation, no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error for a task without steps.
    pub fn auto_assert(&self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.steps.is_empty() {
            return Err(XmError::Validation(format!(
                "task {} has no steps",
                self.name
            )));
        }
        Ok(())
    }

    /// Initialize every step in order.
    ///
    /// # Errors
    ///
    /// Returns the first step init error.
    pub async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        for step in &mut self.steps {
            step.init(runtime).await?;
        }
        Ok(())
    }

    /// Default skip decision; modules decide skipping at their level.
    #[allow(clippy::unused_self)]
    #[must_use]
    pub fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> bool {
        false
    }

    /// Execute the steps in insertion order.
    ///
    /// A failed execute is recorded into `result` (critical) and the step's
    /// post runs regardless; the remaining steps only run when the task or
    /// the runtime ignores errors. The per-task summary always lists every
    /// executed step.
    pub async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        let mut summary: Vec<(String, bool)> = Vec::new();
        let mut combined: Vec<String> = Vec::new();

        for step in &self.steps {
            let report = step.execute(runtime).await;
            if let Err(post_err) = step.post(runtime, report.error.as_ref()).await {
                // post failures never abort
                warn!(task = %self.name, step = %step.name(), error = %post_err, "post hook failed");
                result.record(post_err, false);
            }
            summary.push((step.name().to_string(), report.success));
            if !report.success {
                let error = report.error.unwrap_or_else(|| {
                    XmError::Module(format!("step {} reported failure", step.name()))
                });
                combined.push(error.to_string());
                // a task that ignores errors tolerates its failures; they are
                // recorded but must not fail the module
                result.record(error, !self.ignore_error);
                if !(self.ignore_error || runtime.ignore_error()) {
                    break;
                }
            }
        }

        for (step, ok) in &summary {
            info!(
                task = %self.name,
                step = %step,
                status = if *ok { "SUCCEEDED" } else { "FAILED" },
                "task summary"
            );
        }
        if !combined.is_empty() {
            warn!(task = %self.name, errors = %combined.join("; "), "task finished with errors");
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("ignore_error", &self.ignore_error)
            .finish()
    }
}
