// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestration tests driven entirely by in-memory steps; no SSH involved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use xmcores::cache::Cache;
use xmcores::config::ClusterFile;
use xmcores::error::{Result, XmError};
use xmcores::pipeline::{
    self, init_tasks, run_tasks, Module, ModuleResult, ModuleStatus, Pipeline, Step, StepReport,
    Task,
};
use xmcores::runtime::{Args, ClusterRuntime};

type EventLog = Arc<Mutex<Vec<String>>>;

fn test_runtime() -> Arc<ClusterRuntime> {
    let yaml = r#"
apiVersion: xmcores.io/v1alpha2
kind: Cluster
metadata:
  name: it
spec:
  hosts:
    - name: h1
      address: 192.168.1.10
      user: root
      password: secret
    - name: h2
      address: 192.168.1.11
      user: root
      password: secret
  roleGroups:
    control-plane: [h1]
    worker: [h2]
  kubernetes:
    version: v1.29.2
    clusterName: it.local
  network:
    plugin: calico
    kubePodsCIDR: 10.233.64.0/18
    kubeServiceCIDR: 10.233.0.0/18
"#;
    let cluster = ClusterFile::from_yaml(yaml).unwrap();
    let args = Args {
        work_dir: tempfile::tempdir().unwrap().into_path(),
        ..Default::default()
    };
    ClusterRuntime::new(cluster, args).unwrap()
}

fn ignoring_runtime() -> Arc<ClusterRuntime> {
    let yaml = r#"
apiVersion: xmcores.io/v1alpha2
kind: Cluster
metadata:
  name: it
spec:
  hosts:
    - name: h1
      address: 192.168.1.10
      user: root
      password: secret
"#;
    let cluster = ClusterFile::from_yaml(yaml).unwrap();
    let args = Args {
        work_dir: tempfile::tempdir().unwrap().into_path(),
        ignore_errors: true,
        ..Default::default()
    };
    ClusterRuntime::new(cluster, args).unwrap()
}

/// Appends its name to the shared log; optionally fails.
struct RecordStep {
    name: String,
    log: EventLog,
    fail: bool,
}

impl RecordStep {
    fn new(name: &str, log: &EventLog, fail: bool) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
        }
    }
}

#[async_trait]
impl Step for RecordStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _runtime: &Arc<ClusterRuntime>) -> StepReport {
        self.log.lock().unwrap().push(format!("exec:{}", self.name));
        if self.fail {
            StepReport::failed(
                "boom",
                XmError::Module(format!("{} exploded", self.name)),
            )
        } else {
            StepReport::ok("fine")
        }
    }

    async fn post(
        &self,
        _runtime: &Arc<ClusterRuntime>,
        execute_err: Option<&XmError>,
    ) -> Result<()> {
        self.log.lock().unwrap().push(format!(
            "post:{}:{}",
            self.name,
            if execute_err.is_some() { "err" } else { "ok" }
        ));
        Ok(())
    }
}

struct MockModule {
    name: String,
    skip: bool,
    fail: bool,
    until_polls_needed: u32,
    polled: Arc<Mutex<u32>>,
    log: EventLog,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl MockModule {
    fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            skip: false,
            fail: false,
            until_polls_needed: 0,
            polled: Arc::new(Mutex::new(0)),
            log: Arc::clone(log),
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }

    fn skipping(mut self) -> Self {
        self.skip = true;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn needing_polls(mut self, polls: u32) -> Self {
        self.until_polls_needed = polls;
        self
    }
}

#[async_trait]
impl Module for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        self.log.lock().unwrap().push(format!("init:{}", self.name));
        self.tasks = vec![Task::new(format!("{}-task", self.name)).with_step(RecordStep::new(
            &format!("{}-step", self.name),
            &self.log,
            self.fail,
        ))];
        init_tasks(&mut self.tasks, &self.cache, runtime).await
    }

    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(self.skip)
    }

    async fn run(&self, runtime: &Arc<ClusterRuntime>, result: &mut ModuleResult) {
        run_tasks(&self.tasks, runtime, result).await;
    }

    async fn until(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        let mut polled = self.polled.lock().unwrap();
        *polled += 1;
        Ok(*polled > self.until_polls_needed)
    }

    fn until_budget(&self) -> (Duration, Duration) {
        (Duration::from_millis(10), Duration::from_millis(500))
    }

    fn module_cache(&self) -> Option<&Arc<Cache>> {
        Some(&self.cache)
    }
}

#[tokio::test]
async fn modules_run_in_registration_order() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new("order-test")
        .with_module(MockModule::new("alpha", &log))
        .with_module(MockModule::new("beta", &log))
        .with_module(MockModule::new("gamma", &log));
    pipeline.prepare(&runtime).await.unwrap();
    pipeline.start(&runtime).await.unwrap();

    let names: Vec<&str> = pipeline.results().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["alpha", "beta", "gamma"]);
    for (_, result) in pipeline.results() {
        assert_eq!(result.status(), ModuleStatus::Success);
    }

    let events = log.lock().unwrap().clone();
    let execs: Vec<&String> = events.iter().filter(|e| e.starts_with("exec:")).collect();
    assert_eq!(execs, ["exec:alpha-step", "exec:beta-step", "exec:gamma-step"]);
}

#[tokio::test]
async fn skipped_module_is_skipped_not_failed() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new("skip-test")
        .with_module(MockModule::new("first", &log))
        .with_module(MockModule::new("optional", &log).skipping())
        .with_module(MockModule::new("last", &log));
    pipeline.prepare(&runtime).await.unwrap();
    pipeline.start(&runtime).await.unwrap();

    let statuses: Vec<ModuleStatus> =
        pipeline.results().iter().map(|(_, r)| r.status()).collect();
    assert_eq!(
        statuses,
        [
            ModuleStatus::Success,
            ModuleStatus::Skipped,
            ModuleStatus::Success
        ]
    );
    assert!(!log.lock().unwrap().iter().any(|e| e == "exec:optional-step"));
}

#[tokio::test]
async fn critical_failure_stops_the_pipeline() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new("abort-test")
        .with_module(MockModule::new("ok", &log))
        .with_module(MockModule::new("bad", &log).failing())
        .with_module(MockModule::new("never", &log));
    pipeline.prepare(&runtime).await.unwrap();
    let err = pipeline.start(&runtime).await.unwrap_err();
    assert!(err.to_string().contains("bad"));

    // the pipeline stopped before the third module
    assert_eq!(pipeline.results().len(), 2);
    assert!(!log.lock().unwrap().iter().any(|e| e == "exec:never-step"));
}

#[tokio::test]
async fn ignore_errors_keeps_the_pipeline_going() {
    let runtime = ignoring_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new("ignore-test")
        .with_module(MockModule::new("bad", &log).failing())
        .with_module(MockModule::new("after", &log));
    pipeline.prepare(&runtime).await.unwrap();
    pipeline.start(&runtime).await.unwrap();

    assert_eq!(pipeline.results().len(), 2);
    assert_eq!(pipeline.results()[0].1.status(), ModuleStatus::Failed);
    assert_eq!(pipeline.results()[1].1.status(), ModuleStatus::Success);
    assert!(log.lock().unwrap().iter().any(|e| e == "exec:after-step"));
}

#[tokio::test]
async fn post_runs_even_when_execute_fails() {
    let runtime = ignoring_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let task = Task::new("mixed")
        .with_step(RecordStep::new("one", &log, true))
        .with_step(RecordStep::new("two", &log, false));
    let mut result = ModuleResult::pending();
    task.run(&runtime, &mut result).await;

    let events = log.lock().unwrap().clone();
    assert!(events.contains(&"post:one:err".to_string()));
    // ignore_errors lets the second step run
    assert!(events.contains(&"exec:two".to_string()));
    assert!(result.is_failed());
}

#[tokio::test]
async fn failed_step_short_circuits_without_ignore() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let task = Task::new("strict")
        .with_step(RecordStep::new("one", &log, true))
        .with_step(RecordStep::new("two", &log, false));
    let mut result = ModuleResult::pending();
    task.run(&runtime, &mut result).await;

    let events = log.lock().unwrap().clone();
    assert!(events.contains(&"exec:one".to_string()));
    assert!(!events.contains(&"exec:two".to_string()));
    assert!(result.is_failed());
}

#[tokio::test]
async fn until_is_polled_to_completion() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let module = MockModule::new("poller", &log).needing_polls(3);
    let polled = Arc::clone(&module.polled);
    let mut pipeline = Pipeline::new("until-test").with_module(module);
    pipeline.prepare(&runtime).await.unwrap();
    pipeline.start(&runtime).await.unwrap();

    assert_eq!(*polled.lock().unwrap(), 4);
    assert_eq!(pipeline.results()[0].1.status(), ModuleStatus::Success);
}

#[tokio::test]
async fn until_timeout_fails_the_module() {
    let runtime = test_runtime();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    // 500 ms budget at 10 ms per poll can never reach 1000 polls
    let module = MockModule::new("stuck", &log).needing_polls(1000);
    let mut pipeline = Pipeline::new("until-timeout-test").with_module(module);
    pipeline.prepare(&runtime).await.unwrap();
    let err = pipeline.start(&runtime).await.unwrap_err();
    assert!(err.to_string().contains("stuck"));
    assert_eq!(pipeline.results()[0].1.status(), ModuleStatus::Failed);
}

#[tokio::test]
async fn registry_builds_prepared_pipelines() {
    fn factory(_runtime: &Arc<ClusterRuntime>) -> xmcores::error::Result<Pipeline> {
        Ok(Pipeline::new("from-registry"))
    }
    pipeline::register("pipeline-test-registry", factory);
    let runtime = test_runtime();
    let built = pipeline::get_pipeline("pipeline-test-registry", &runtime)
        .await
        .unwrap();
    assert_eq!(built.name(), "from-registry");

    let missing = pipeline::get_pipeline("no-such-pipeline", &runtime).await;
    assert!(matches!(missing, Err(XmError::UnknownPipeline(_))));
}

#[tokio::test]
async fn builtin_cluster_install_is_registered() {
    xmcores::modules::register_builtin_pipelines();
    assert!(pipeline::registered().contains(&"cluster-install".to_string()));

    // Building it against the test runtime exercises every module's
    // default/auto-assert/init without touching a host.
    let runtime = test_runtime();
    let built = pipeline::get_pipeline("cluster-install", &runtime).await.unwrap();
    assert_eq!(built.name(), "cluster-install");
}
