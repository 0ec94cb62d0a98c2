//! Cluster orchestrator capability interface
//!
//! [`ClusterAdapter`] is the only way the rest of Astro touches the cluster:
//! - [`KubeClusterAdapter`] - production implementation over kube-rs
//!   (Namespace, Deployment, Service, Pod)
//! - [`InMemoryClusterAdapter`] - deterministic implementation with call
//!   recording and failure injection
//!
//! Exactly one implementation is active per controller; it is chosen by the
//! caller at construction time.

#![deny(missing_docs)]

pub mod adapter;
pub mod error;
pub mod kube_adapter;
pub mod memory;
pub mod types;

pub use adapter::ClusterAdapter;
pub use error::{ClusterError, ClusterStep};
pub use kube_adapter::KubeClusterAdapter;
pub use memory::{AdapterCall, InMemoryClusterAdapter, InMemoryWorkload};
pub use types::{derive_status, AppStatus, MemberInfo, StatusInfo, UnknownStatus, WorkloadSpec};

#[cfg(test)]
pub use adapter::MockClusterAdapter;
