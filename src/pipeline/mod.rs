// SPDX-License-Identifier: MIT OR Apache-2.0

//! The orchestration core: Pipeline → Module → Task → Step.
//!
//! Each layer holds strong references downward and, at most, a reference to
//! the [`ClusterRuntime`](crate::runtime::ClusterRuntime) — never to its
//! parent. Ordering guarantees: modules, tasks and steps each execute in
//! insertion order; only a step's per-host fan-out is unordered, and its
//! outcomes are sorted by host name before reporting.

pub mod module;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod step;
pub mod task;

pub use module::{init_tasks, run_tasks, Module, UNTIL_INTERVAL, UNTIL_TIMEOUT};
pub use pipeline::Pipeline;
pub use registry::{get_pipeline, register, registered, PipelineFactory};
pub use result::{ModuleResult, ModuleStatus, ResultError};
pub use step::{combine, fan_out, CommandStep, HostOutcome, Step, StepReport, UploadStep};
pub use task::Task;
