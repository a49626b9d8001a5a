// SPDX-License-Identifier: MIT OR Apache-2.0

//! The smallest executable unit of the orchestration hierarchy.
//!
//! A step targets one or more hosts chosen by role, fans out over them
//! concurrently and aggregates the per-host outcomes deterministically
//! (sorted by host name). [`CommandStep`] and [`UploadStep`] cover most
//! module needs; anything else implements [`Step`] directly.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::connector::Host;
use crate::error::{Result, XmError};
use crate::runtime::ClusterRuntime;

/// What a step execution produced.
#[derive(Debug)]
pub struct StepReport {
    /// Aggregated, host-tagged output.
    pub output: String,
    /// Whether every targeted host succeeded.
    pub success: bool,
    /// Combined error when any host failed.
    pub error: Option<XmError>,
}

impl StepReport {
    /// A successful report.
    #[must_use]
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            error: None,
        }
    }

    /// A failed report.
    #[must_use]
    pub fn failed(output: impl Into<String>, error: XmError) -> Self {
        Self {
            output: output.into(),
            success: false,
            error: Some(error),
        }
    }
}

/// Init / Execute / Post contract for one unit of remote work.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Validate parameters and pre-resolve paths.
    async fn init(&mut self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        Ok(())
    }

    /// Run on the step's target hosts.
    async fn execute(&self, runtime: &Arc<ClusterRuntime>) -> StepReport;

    /// Always called after execute, with execute's error if any.
    async fn post(
        &self,
        _runtime: &Arc<ClusterRuntime>,
        _execute_err: Option<&XmError>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one host within a fan-out.
#[derive(Debug)]
pub struct HostOutcome {
    pub host: String,
    pub output: String,
    pub exit_code: i32,
    pub error: Option<XmError>,
}

impl HostOutcome {
    /// A per-host success.
    #[must_use]
    pub fn ok(host: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            output: output.into(),
            exit_code: 0,
            error: None,
        }
    }

    /// A per-host failure.
    #[must_use]
    pub fn err(host: impl Into<String>, error: XmError) -> Self {
        let exit_code = match &error {
            XmError::CommandFailed { exit_code, .. } => *exit_code,
            _ => -1,
        };
        Self {
            host: host.into(),
            output: String::new(),
            exit_code,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

type HostFuture = Pin<Box<dyn Future<Output = HostOutcome> + Send>>;

/// Run `work` once per host, concurrently. Outcomes arrive in completion
/// order and are sorted by host name so summaries stay deterministic.
///
/// A failure short-circuits the hosts still in flight unless the runtime
/// ignores errors; aborted hosts simply do not appear in the outcome list.
pub async fn fan_out<F>(runtime: &Arc<ClusterRuntime>, hosts: Vec<Host>, work: F) -> Vec<HostOutcome>
where
    F: Fn(Arc<ClusterRuntime>, Host) -> HostFuture,
{
    let mut set = JoinSet::new();
    for host in hosts {
        set.spawn(work(Arc::clone(runtime), host));
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => {
                let failed = outcome.failed();
                outcomes.push(outcome);
                if failed && !runtime.ignore_error() {
                    set.abort_all();
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(error = %e, "host worker panicked"),
        }
    }
    outcomes.sort_by(|a, b| a.host.cmp(&b.host));
    outcomes
}

/// Fold per-host outcomes into one report, logging each failure with the
/// host, exit code and the tail of its output.
#[must_use]
pub fn combine(step: &str, outcomes: &[HostOutcome]) -> StepReport {
    let mut lines = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        lines.push(format!("[{}] {}", outcome.host, outcome.output.trim_end()));
        if let Some(err) = &outcome.error {
            error!(
                step,
                host = %outcome.host,
                exit_code = outcome.exit_code,
                error = %err,
                "step failed on host"
            );
            failures.push(format!("{}: {err}", outcome.host));
        } else {
            info!(step, host = %outcome.host, "step succeeded on host");
        }
    }
    let output = lines.join("\n");
    if failures.is_empty() {
        StepReport::ok(output)
    } else {
        let error = XmError::Hosts(failures.len(), failures.join("; "));
        StepReport::failed(output, error)
    }
}

/// Runs one command on every host of a role group.
pub struct CommandStep {
    name: String,
    role: String,
    command: String,
    sudo: bool,
    timeout: Option<Duration>,
}

impl CommandStep {
    /// A step running `command` on every `role` host.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            command: command.into(),
            sudo: false,
            timeout: None,
        }
    }

    /// Elevate through the canonical sudo envelope.
    #[must_use]
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Bound each host's execution.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Step for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(XmError::Validation(format!(
                "step {}: command must not be empty",
                self.name
            )));
        }
        if self.role.is_empty() {
            return Err(XmError::Validation(format!(
                "step {}: target role must not be empty",
                self.name
            )));
        }
        Ok(())
    }

    async fn execute(&self, runtime: &Arc<ClusterRuntime>) -> StepReport {
        let hosts = runtime.hosts_by_role(&self.role);
        if hosts.is_empty() {
            return StepReport::ok(format!("no hosts in role {}", self.role));
        }
        let command = Arc::new(self.command.clone());
        let sudo = self.sudo;
        let timeout = self.timeout;
        let outcomes = fan_out(runtime, hosts, move |rt, host| {
            let command = Arc::clone(&command);
            Box::pin(async move {
                let cancel = rt.call_ctx(timeout);
                let runner = match rt.runner_for(&host).await {
                    Ok(runner) => runner,
                    Err(e) => return HostOutcome::err(host.id(), e),
                };
                let run = if sudo {
                    runner.sudo_run(&cancel, &command).await
                } else {
                    runner.run(&cancel, &command).await
                };
                match run.and_then(|out| out.check(&command)) {
                    Ok(out) => HostOutcome::ok(host.id(), out.stdout),
                    Err(e) => HostOutcome::err(host.id(), e),
                }
            })
        })
        .await;
        combine(&self.name, &outcomes)
    }
}

/// Uploads a local file to the same path on every host of a role group,
/// with MD5 skip/verify semantics.
pub struct UploadStep {
    name: String,
    role: String,
    src: PathBuf,
    dest: String,
}

impl UploadStep {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        src: impl Into<PathBuf>,
        dest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            src: src.into(),
            dest: dest.into(),
        }
    }
}

#[async_trait]
impl Step for UploadStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self, _runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if !self.src.exists() {
            return Err(XmError::Validation(format!(
                "step {}: local source {} does not exist",
                self.name,
                self.src.display()
            )));
        }
        Ok(())
    }

    async fn execute(&self, runtime: &Arc<ClusterRuntime>) -> StepReport {
        let hosts = runtime.hosts_by_role(&self.role);
        if hosts.is_empty() {
            return StepReport::ok(format!("no hosts in role {}", self.role));
        }
        let src = Arc::new(self.src.clone());
        let dest = Arc::new(self.dest.clone());
        let outcomes = fan_out(runtime, hosts, move |rt, host| {
            let src = Arc::clone(&src);
            let dest = Arc::clone(&dest);
            Box::pin(async move {
                let cancel = rt.call_ctx(None);
                let conn = match rt.connector().get(&host).await {
                    Ok(conn) => conn,
                    Err(e) => return HostOutcome::err(host.id(), e),
                };
                match conn.upload_file(&cancel, &src, &dest).await {
                    Ok(()) => HostOutcome::ok(host.id(), format!("uploaded {dest}")),
                    Err(e) => HostOutcome::err(host.id(), e),
                }
            })
        })
        .await;
        combine(&self.name, &outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_err_extracts_exit_code() {
        let outcome = HostOutcome::err(
            "node1",
            XmError::CommandFailed {
                cmd: "exit 7".to_string(),
                exit_code: 7,
                output: String::new(),
            },
        );
        assert_eq!(outcome.exit_code, 7);
        assert!(outcome.failed());

        let transport = HostOutcome::err("node1", XmError::ConnectionClosed);
        assert_eq!(transport.exit_code, -1);
    }

    #[test]
    fn test_combine_success() {
        let outcomes = vec![
            HostOutcome::ok("node1", "ready"),
            HostOutcome::ok("node2", "ready"),
        ];
        let report = combine("probe", &outcomes);
        assert!(report.success);
        assert!(report.output.contains("[node1] ready"));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_combine_reports_failures() {
        let outcomes = vec![
            HostOutcome::ok("node1", "ready"),
            HostOutcome::err("node2", XmError::ConnectionClosed),
        ];
        let report = combine("probe", &outcomes);
        assert!(!report.success);
        match report.error {
            Some(XmError::Hosts(count, ref detail)) => {
                assert_eq!(count, 1);
                assert!(detail.contains("node2"));
            }
            ref other => panic!("expected Hosts error, got {other:?}"),
        }
    }
}
