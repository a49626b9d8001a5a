// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary etcd deployment on the etcd role group.
//!
//! Only runs for `etcd.type: kubexm`; kubeadm-managed and external etcd
//! need nothing from this module.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::{EtcdSpec, EtcdType, ROLE_ETCD};
use crate::error::{Result, XmError};
use crate::pipeline::{init_tasks, run_tasks, CommandStep, Module, ModuleResult, Task};
use crate::runtime::ClusterRuntime;

pub struct EtcdModule {
    spec: EtcdSpec,
    cache: Arc<Cache>,
    tasks: Vec<Task>,
}

impl EtcdModule {
    #[must_use]
    pub fn new(spec: EtcdSpec) -> Self {
        Self {
            spec,
            cache: Arc::new(Cache::new()),
            tasks: Vec::new(),
        }
    }
}

#[async_trait]
impl Module for EtcdModule {
    fn name(&self) -> &str {
        "etcd"
    }

    fn slogan(&self) -> String {
        "[etcd] deploying the etcd cluster".to_string()
    }

    fn auto_assert(&self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        if self.spec.kind == EtcdType::Kubexm && runtime.hosts_by_role(ROLE_ETCD).is_empty() {
            return Err(XmError::Validation(
                "etcd.type is kubexm but the etcd role group is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn is_skip(&self, _runtime: &Arc<ClusterRuntime>) -> Result<bool> {
        Ok(self.spec.kind != EtcdType::Kubexm)
    }

    async fn init(&mut self, runtime: &Arc<ClusterRuntime>) -> Result<()> {
        self.tasks = vec![
            Task::new("prepare-etcd-dirs").with_step(
                CommandStep::new(
                    "make-dirs",
                    ROLE_ETCD,
                    "mkdir -p /etc/ssl/etcd/ssl /var/lib/etcd && chmod 700 /var/lib/etcd",
                )
                .sudo(),
            ),
            Task::new("install-etcd")
                .with_step(
                    CommandStep::new(
                        "install-binary",
                        ROLE_ETCD,
                        "test -x /usr/local/bin/etcd || tar -C /usr/local/bin --strip-components=1 -xzf /tmp/etcd.tar.gz",
                    )
                    .sudo(),
                )
                .with_step(
                    CommandStep::new(
                        "enable-service",
                        ROLE_ETCD,
                        "systemctl daemon-reload && systemctl enable --now etcd",
                    )
                    .sudo(),
                ),
            Task::new("verify-etcd").with_step(
                CommandStep::new(
                    "member-list",
                    ROLE_ETCD,
                    "etcdctl endpoint health --endpoints=https://127.0.0.1:2379 \
                     --cacert=/etc/ssl/etcd/ssl/ca.pem",
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
