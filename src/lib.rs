// SPDX-License-Identifier: MIT OR Apache-2.0

//! # xmcores
//!
//! A declarative Kubernetes cluster provisioner: a YAML cluster file in,
//! SSH sessions out. The crate drives a set of remote machines to the
//! described state through two cores:
//!
//! - **Remote execution** — multiplexed SSH command execution, SFTP file
//!   transfer, PTY-based sudo password injection and sudo file-operation
//!   fallbacks, with connection caching, bastion hops and cancellation.
//! - **Orchestration** — a Pipeline → Module → Task → Step hierarchy with
//!   explicit Default/AutoAssert/Init/Run/Until/PostHook phases, per-host
//!   fan-out, result aggregation and an `IgnoreError` policy.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xmcores::config::ClusterFile;
//! use xmcores::modules::{register_builtin_pipelines, PIPELINE_CLUSTER_INSTALL};
//! use xmcores::pipeline::get_pipeline;
//! use xmcores::runtime::{Args, ClusterRuntime};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = ClusterFile::load_from_path("cluster.yaml")?;
//! let runtime = ClusterRuntime::new(cluster, Args::default())?;
//!
//! register_builtin_pipelines();
//! let mut pipeline = get_pipeline(PIPELINE_CLUSTER_INSTALL, &runtime).await?;
//! pipeline.start(&runtime).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`connector`] — hosts, dialing, connections, the connection cache
//! - [`pipeline`] — the orchestration hierarchy and the pipeline registry
//! - [`modules`] — the built-in cluster-install modules
//! - [`config`] — cluster file parsing
//! - [`runtime`] — shared run state and logging setup
//! - [`cache`] — the typed TTL cache used at pipeline/module/task scope
//! - [`error`] — error types
//! - [`cli`] — the `xm` binary's command line
//! - [`testkit`] — testing utilities

pub mod cache;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod modules;
pub mod pipeline;
pub mod runtime;
pub mod testkit;
pub mod util;

pub use config::ClusterFile;
pub use connector::{
    CommandOutput, Connection, ConnectionConfig, ConnectorCache, Dialer, Host, Runner,
    SudoPolicy,
};
pub use error::{Result, XmError};
pub use pipeline::{
    get_pipeline, register, CommandStep, Module, ModuleResult, ModuleStatus, Pipeline, Step,
    StepReport, Task, UploadStep,
};
pub use runtime::{Args, ClusterRuntime};
