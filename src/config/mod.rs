// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster specification loading.
//!
//! The cluster file is a small YAML document with `apiVersion`, `kind`,
//! `metadata` and a `spec` tree describing hosts, role groups and the
//! Kubernetes/etcd/network/registry configuration. Everything is read-only
//! after loading; module factories receive the trees by reference.

mod cluster;

pub use cluster::{
    BastionSpec, ClusterFile, ClusterSpec, ControlPlaneEndpointSpec, EtcdSpec, EtcdType, HostSpec,
    KubernetesSpec, LoadBalancerSpec, Metadata, MultusCni, NetworkSpec, RegistryAuth,
    RegistrySpec, RoleGroups, ROLE_ALL, ROLE_CONTROL_PLANE, ROLE_ETCD, ROLE_K8S,
    ROLE_LOADBALANCER, ROLE_MASTER, ROLE_WORKER,
};
