// SPDX-License-Identifier: MIT OR Apache-2.0

//! The built-in pipeline modules.
//!
//! Each module owns its typed slice of the cluster spec (handed over by the
//! pipeline factory), assembles its tasks at init, and plugs into the
//! [`Module`](crate::pipeline::Module) lifecycle. The command bodies are
//! deliberately thin; the orchestration semantics around them are not.

mod addons;
mod bootstrap;
mod container_runtime;
mod etcd;
mod join;
mod loadbalancer;
mod network;
mod precheck;
mod registry;

pub use addons::AddonsModule;
pub use bootstrap::BootstrapModule;
pub use container_runtime::ContainerRuntimeModule;
pub use etcd::EtcdModule;
pub use join::JoinModule;
pub use loadbalancer::LoadBalancerModule;
pub use network::NetworkModule;
pub use precheck::PrecheckModule;
pub use registry::RegistryModule;

use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{self, Pipeline};
use crate::runtime::ClusterRuntime;

/// Name of the cluster creation pipeline.
pub const PIPELINE_CLUSTER_INSTALL: &str = "cluster-install";

/// Populate the process-wide registry with the built-in pipelines. The
/// binary calls this once before any lookup.
pub fn register_builtin_pipelines() {
    pipeline::register(PIPELINE_CLUSTER_INSTALL, cluster_install_factory);
}

/// Assemble the cluster-install pipeline in execution order.
fn cluster_install_factory(runtime: &Arc<ClusterRuntime>) -> Result<Pipeline> {
    let spec = &runtime.cluster().spec;
    let args = runtime.args();
    Ok(Pipeline::new(PIPELINE_CLUSTER_INSTALL)
        .with_module(PrecheckModule::new())
        .with_module(ContainerRuntimeModule::new(
            spec.kubernetes.clone(),
            args.install_packages,
        ))
        .with_module(EtcdModule::new(spec.etcd.clone()))
        .with_module(LoadBalancerModule::new(spec.control_plane_endpoint.clone()))
        .with_module(BootstrapModule::new(
            spec.kubernetes.clone(),
            spec.control_plane_endpoint.clone(),
            spec.network.clone(),
        ))
        .with_module(JoinModule::new(spec.kubernetes.clone()))
        .with_module(NetworkModule::new(spec.network.clone()))
        .with_module(RegistryModule::new(
            spec.registry.clone(),
            args.skip_push_images,
        ))
        .with_module(AddonsModule::new(
            args.skip_install_addons,
            args.deploy_local_storage,
        )))
}
