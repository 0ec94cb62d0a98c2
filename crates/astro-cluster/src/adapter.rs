//! The cluster capability trait

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::ClusterError;
use crate::types::{StatusInfo, WorkloadSpec};

/// Trait abstracting the cluster orchestrator
///
/// All operations except [`ClusterAdapter::ensure_namespace`] and
/// [`ClusterAdapter::create_workload`] are addressed by `(name, namespace)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Ensure the namespace exists, creating it with the ownership label.
    ///
    /// Idempotent. Losing a creation race to a concurrent caller is success.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClusterError>;

    /// Ensure the namespace, create the workload and, when the spec has a
    /// port, the exposure resource.
    ///
    /// The two writes are independent: if the exposure fails the workload
    /// stays live and the error reports [`crate::ClusterStep::CreateExposure`].
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    /// Delete the workload and its exposure resource. Missing objects are
    /// not an error.
    async fn delete_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    /// Overwrite the desired replica count (unguarded read-modify-write;
    /// concurrent callers on the same workload are last-writer-wins)
    async fn scale_workload(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Read the current status; a missing workload is
    /// [`crate::AppStatus::Unknown`], not an error
    async fn query_status(&self, name: &str, namespace: &str) -> Result<StatusInfo, ClusterError>;

    /// Trigger a rolling restart by stamping the pod template (same
    /// read-modify-write caveat as scaling)
    async fn restart_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    /// Tail up to `lines` lines from one member process
    async fn fetch_logs(
        &self,
        name: &str,
        namespace: &str,
        lines: i64,
    ) -> Result<String, ClusterError>;
}
