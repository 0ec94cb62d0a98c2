//! In-memory [`ClusterAdapter`]
//!
//! Holds namespaces, workloads and exposures in concurrent maps and records
//! every call. Tests drive it by setting ready counts and member processes,
//! and by injecting a failure at any [`ClusterStep`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use astro_common::DEFAULT_MANAGED_BY;

use crate::adapter::ClusterAdapter;
use crate::error::{ClusterError, ClusterStep};
use crate::types::{derive_status, MemberInfo, StatusInfo, WorkloadSpec};

type Key = (String, String);

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// A call received by [`InMemoryClusterAdapter`], in arrival order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterCall {
    /// `ensure_namespace`, including the one issued by `create_workload`
    EnsureNamespace {
        /// Namespace
        namespace: String,
    },
    /// Workload creation
    CreateWorkload {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
        /// Requested replicas
        replicas: i32,
    },
    /// Exposure creation, issued only for specs with a port
    CreateExposure {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
        /// Exposed port
        port: u16,
    },
    /// Workload and exposure deletion
    DeleteWorkload {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
    },
    /// Replica update
    ScaleWorkload {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
        /// New desired replicas
        replicas: i32,
    },
    /// Status query
    QueryStatus {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
    },
    /// Rolling restart
    RestartWorkload {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
    },
    /// Log fetch
    FetchLogs {
        /// Workload name
        name: String,
        /// Namespace
        namespace: String,
        /// Requested tail lines
        lines: i64,
    },
}

/// Stored state of one workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InMemoryWorkload {
    /// Image the workload was created with
    pub image: String,
    /// Labels applied to the workload
    pub labels: BTreeMap<String, String>,
    /// Desired replicas, `None` models an unset count
    pub replicas: Option<i32>,
    /// Ready replicas, `None` models an absent status
    pub ready_replicas: Option<i32>,
    /// Value of the last restart marker
    pub restarted_at: Option<String>,
    /// Number of restarts triggered
    pub restarts: u32,
    /// Member processes with their log text, in listing order
    pub members: Vec<(MemberInfo, String)>,
}

/// Deterministic cluster double
#[derive(Default)]
pub struct InMemoryClusterAdapter {
    namespaces: DashMap<String, BTreeMap<String, String>>,
    namespace_creations: AtomicUsize,
    workloads: DashMap<Key, InMemoryWorkload>,
    exposures: DashMap<Key, u16>,
    failures: Mutex<HashSet<ClusterStep>>,
    calls: Mutex<Vec<AdapterCall>>,
}

impl InMemoryClusterAdapter {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call reaching `step` fail
    pub fn fail_on(&self, step: ClusterStep) {
        self.failures.lock().insert(step);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Whether the namespace exists
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Labels the namespace was created with
    pub fn namespace_labels(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        self.namespaces.get(namespace).map(|ns| ns.clone())
    }

    /// How many namespace creations actually happened
    pub fn namespace_creations(&self) -> usize {
        self.namespace_creations.load(Ordering::SeqCst)
    }

    /// Snapshot of a workload
    pub fn workload(&self, name: &str, namespace: &str) -> Option<InMemoryWorkload> {
        self.workloads.get(&key(name, namespace)).map(|w| w.clone())
    }

    /// Port of the workload's exposure, if one exists
    pub fn exposure(&self, name: &str, namespace: &str) -> Option<u16> {
        self.exposures.get(&key(name, namespace)).map(|p| *p)
    }

    /// Insert or replace a workload directly, bypassing the call log
    pub fn insert_workload(&self, name: &str, namespace: &str, workload: InMemoryWorkload) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default();
        self.workloads.insert(key(name, namespace), workload);
    }

    /// Set the desired count as the cluster sees it (models out-of-band changes)
    pub fn set_replicas(&self, name: &str, namespace: &str, replicas: Option<i32>) {
        if let Some(mut w) = self.workloads.get_mut(&key(name, namespace)) {
            w.replicas = replicas;
        }
    }

    /// Set how many replicas report ready
    pub fn set_ready_replicas(&self, name: &str, namespace: &str, ready: Option<i32>) {
        if let Some(mut w) = self.workloads.get_mut(&key(name, namespace)) {
            w.ready_replicas = ready;
        }
    }

    /// Attach a member process with its log text
    pub fn add_member(&self, name: &str, namespace: &str, member: MemberInfo, logs: &str) {
        if let Some(mut w) = self.workloads.get_mut(&key(name, namespace)) {
            w.members.push((member, logs.to_string()));
        }
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, step: ClusterStep) -> Result<(), ClusterError> {
        if self.failures.lock().contains(&step) {
            return Err(ClusterError::backend(step, "injected failure"));
        }
        Ok(())
    }

    fn missing(step: ClusterStep, name: &str, namespace: &str) -> ClusterError {
        ClusterError::backend(step, format!("workload {namespace}/{name} not found"))
    }
}

/// Last `lines` lines of `text`; a non-positive count returns everything
fn tail(text: &str, lines: i64) -> String {
    let all: Vec<&str> = text.lines().collect();
    let keep = usize::try_from(lines)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(all.len())
        .min(all.len());
    let mut out = all[all.len() - keep..].join("\n");
    if keep > 0 && text.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[async_trait]
impl ClusterAdapter for InMemoryClusterAdapter {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        self.record(AdapterCall::EnsureNamespace {
            namespace: namespace.to_string(),
        });
        self.check(ClusterStep::EnsureNamespace)?;

        if let Entry::Vacant(slot) = self.namespaces.entry(namespace.to_string()) {
            slot.insert(BTreeMap::from([(
                astro_common::LABEL_MANAGED_BY.to_string(),
                DEFAULT_MANAGED_BY.to_string(),
            )]));
            self.namespace_creations.fetch_add(1, Ordering::SeqCst);
            debug!(namespace = %namespace, "created namespace");
        }
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        self.ensure_namespace(&spec.namespace).await?;

        self.record(AdapterCall::CreateWorkload {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            replicas: spec.replicas,
        });
        self.check(ClusterStep::CreateWorkload)?;

        match self.workloads.entry(key(&spec.name, &spec.namespace)) {
            Entry::Occupied(_) => {
                return Err(ClusterError::backend(
                    ClusterStep::CreateWorkload,
                    format!("workload {}/{} already exists", spec.namespace, spec.name),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(InMemoryWorkload {
                    image: spec.image.clone(),
                    labels: spec.labels(DEFAULT_MANAGED_BY),
                    replicas: Some(spec.replicas),
                    ready_replicas: None,
                    restarted_at: None,
                    restarts: 0,
                    members: Vec::new(),
                });
            }
        }

        if let Some(port) = spec.exposed_port() {
            self.record(AdapterCall::CreateExposure {
                name: spec.name.clone(),
                namespace: spec.namespace.clone(),
                port,
            });
            self.check(ClusterStep::CreateExposure)?;
            self.exposures
                .insert(key(&spec.name, &spec.namespace), port);
        }
        Ok(())
    }

    async fn delete_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        self.record(AdapterCall::DeleteWorkload {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });

        self.check(ClusterStep::DeleteWorkload)?;
        self.workloads.remove(&key(name, namespace));

        self.check(ClusterStep::DeleteExposure)?;
        self.exposures.remove(&key(name, namespace));
        Ok(())
    }

    async fn scale_workload(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.record(AdapterCall::ScaleWorkload {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas,
        });
        self.check(ClusterStep::GetWorkload)?;
        let mut workload = self
            .workloads
            .get_mut(&key(name, namespace))
            .ok_or_else(|| Self::missing(ClusterStep::GetWorkload, name, namespace))?;
        self.check(ClusterStep::UpdateWorkload)?;
        workload.replicas = Some(replicas);
        Ok(())
    }

    async fn query_status(&self, name: &str, namespace: &str) -> Result<StatusInfo, ClusterError> {
        self.record(AdapterCall::QueryStatus {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        self.check(ClusterStep::GetWorkload)?;

        let Some(workload) = self.workload(name, namespace) else {
            return Ok(StatusInfo::unknown());
        };
        self.check(ClusterStep::ListMembers)?;

        Ok(StatusInfo {
            status: derive_status(workload.replicas, workload.ready_replicas),
            ready_replicas: workload.ready_replicas.unwrap_or(0),
            replicas: workload.replicas.unwrap_or(0),
            members: workload.members.into_iter().map(|(m, _)| m).collect(),
        })
    }

    async fn restart_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        self.record(AdapterCall::RestartWorkload {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        self.check(ClusterStep::GetWorkload)?;
        let mut workload = self
            .workloads
            .get_mut(&key(name, namespace))
            .ok_or_else(|| Self::missing(ClusterStep::GetWorkload, name, namespace))?;
        self.check(ClusterStep::UpdateWorkload)?;
        workload.restarted_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        workload.restarts += 1;
        Ok(())
    }

    async fn fetch_logs(
        &self,
        name: &str,
        namespace: &str,
        lines: i64,
    ) -> Result<String, ClusterError> {
        self.record(AdapterCall::FetchLogs {
            name: name.to_string(),
            namespace: namespace.to_string(),
            lines,
        });
        self.check(ClusterStep::ListMembers)?;

        let logs = self
            .workloads
            .get(&key(name, namespace))
            .and_then(|w| w.members.first().map(|(_, logs)| logs.clone()))
            .ok_or_else(|| ClusterError::NoMembers {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        self.check(ClusterStep::FetchLogs)?;
        Ok(tail(&logs, lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppStatus;
    use std::sync::Arc;

    fn member(name: &str, ready: bool) -> MemberInfo {
        MemberInfo {
            name: name.to_string(),
            phase: "Running".to_string(),
            ready,
        }
    }

    #[tokio::test]
    async fn concurrent_ensure_namespace_both_succeed() {
        let cluster = Arc::new(InMemoryClusterAdapter::new());
        let (a, b) = tokio::join!(
            cluster.ensure_namespace("astro-user-7"),
            cluster.ensure_namespace("astro-user-7")
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert!(cluster.namespace_exists("astro-user-7"));
        assert_eq!(cluster.namespace_creations(), 1);
    }

    #[tokio::test]
    async fn concurrent_ensure_namespace_across_tasks() {
        let cluster = Arc::new(InMemoryClusterAdapter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cluster = Arc::clone(&cluster);
                tokio::spawn(async move { cluster.ensure_namespace("astro-user-3").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(cluster.namespace_creations(), 1);
        let labels = cluster.namespace_labels("astro-user-3").unwrap();
        assert_eq!(labels.get("managed-by").map(String::as_str), Some("astro"));
    }

    #[tokio::test]
    async fn create_without_port_creates_no_exposure() {
        let cluster = InMemoryClusterAdapter::new();
        let spec = WorkloadSpec::new("web", "astro-user-7", "x:1", 3);
        cluster.create_workload(&spec).await.unwrap();

        assert_eq!(
            cluster.calls(),
            vec![
                AdapterCall::EnsureNamespace {
                    namespace: "astro-user-7".to_string()
                },
                AdapterCall::CreateWorkload {
                    name: "web".to_string(),
                    namespace: "astro-user-7".to_string(),
                    replicas: 3,
                },
            ]
        );
        assert_eq!(cluster.exposure("web", "astro-user-7"), None);
    }

    #[tokio::test]
    async fn exposure_failure_leaves_workload_live() {
        let cluster = InMemoryClusterAdapter::new();
        cluster.fail_on(ClusterStep::CreateExposure);
        let spec = WorkloadSpec::new("api", "ns", "api:1", 1).with_port(Some(8080));

        let err = cluster.create_workload(&spec).await.unwrap_err();
        assert_eq!(err.step(), ClusterStep::CreateExposure);
        assert!(cluster.workload("api", "ns").is_some());
        assert_eq!(cluster.exposure("api", "ns"), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cluster = InMemoryClusterAdapter::new();
        let spec = WorkloadSpec::new("api", "ns", "api:1", 1).with_port(Some(80));
        cluster.create_workload(&spec).await.unwrap();

        cluster.delete_workload("api", "ns").await.unwrap();
        cluster.delete_workload("api", "ns").await.unwrap();
        assert!(cluster.workload("api", "ns").is_none());
        assert_eq!(cluster.exposure("api", "ns"), None);
    }

    #[tokio::test]
    async fn query_status_of_missing_workload_is_unknown() {
        let cluster = InMemoryClusterAdapter::new();
        let info = cluster.query_status("ghost", "ns").await.unwrap();
        assert_eq!(info, StatusInfo::unknown());
    }

    #[tokio::test]
    async fn query_status_derives_from_counts() {
        let cluster = InMemoryClusterAdapter::new();
        cluster
            .create_workload(&WorkloadSpec::new("web", "ns", "x:1", 3))
            .await
            .unwrap();

        cluster.set_ready_replicas("web", "ns", Some(3));
        assert_eq!(
            cluster.query_status("web", "ns").await.unwrap().status,
            AppStatus::Running
        );

        cluster.set_ready_replicas("web", "ns", Some(1));
        assert_eq!(
            cluster.query_status("web", "ns").await.unwrap().status,
            AppStatus::Starting
        );

        cluster.set_replicas("web", "ns", Some(0));
        cluster.set_ready_replicas("web", "ns", Some(2));
        let info = cluster.query_status("web", "ns").await.unwrap();
        assert_eq!(info.status, AppStatus::Stopped);
        assert_eq!(info.ready_replicas, 2);
        assert_eq!(info.replicas, 0);
    }

    #[tokio::test]
    async fn scale_and_restart_need_an_existing_workload() {
        let cluster = InMemoryClusterAdapter::new();
        let err = cluster.scale_workload("ghost", "ns", 2).await.unwrap_err();
        assert_eq!(err.step(), ClusterStep::GetWorkload);
        let err = cluster.restart_workload("ghost", "ns").await.unwrap_err();
        assert_eq!(err.step(), ClusterStep::GetWorkload);

        cluster
            .create_workload(&WorkloadSpec::new("web", "ns", "x:1", 1))
            .await
            .unwrap();
        cluster.scale_workload("web", "ns", 4).await.unwrap();
        cluster.restart_workload("web", "ns").await.unwrap();

        let workload = cluster.workload("web", "ns").unwrap();
        assert_eq!(workload.replicas, Some(4));
        assert_eq!(workload.restarts, 1);
        assert!(workload.restarted_at.is_some());
        assert_eq!(workload.image, "x:1");
    }

    #[tokio::test]
    async fn fetch_logs_without_members_is_not_found() {
        let cluster = InMemoryClusterAdapter::new();
        cluster
            .create_workload(&WorkloadSpec::new("web", "ns", "x:1", 1))
            .await
            .unwrap();
        let err = cluster.fetch_logs("web", "ns", 100).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, ClusterError::NoMembers { .. }));
    }

    #[tokio::test]
    async fn fetch_logs_tails_first_member() {
        let cluster = InMemoryClusterAdapter::new();
        cluster
            .create_workload(&WorkloadSpec::new("web", "ns", "x:1", 2))
            .await
            .unwrap();
        cluster.add_member("web", "ns", member("web-a", true), "one\ntwo\nthree\n");
        cluster.add_member("web", "ns", member("web-b", false), "other\n");

        assert_eq!(cluster.fetch_logs("web", "ns", 2).await.unwrap(), "two\nthree\n");
        assert_eq!(
            cluster.fetch_logs("web", "ns", 100).await.unwrap(),
            "one\ntwo\nthree\n"
        );

        let info = cluster.query_status("web", "ns").await.unwrap();
        assert_eq!(info.members.len(), 2);
        assert!(!info.members[1].ready);
    }

    #[test]
    fn tail_handles_edges() {
        assert_eq!(tail("", 5), "");
        assert_eq!(tail("a\nb", 1), "b");
        assert_eq!(tail("a\nb\n", 0), "a\nb\n");
    }

    #[tokio::test]
    async fn injected_failures_can_be_cleared() {
        let cluster = InMemoryClusterAdapter::new();
        cluster.fail_on(ClusterStep::EnsureNamespace);
        assert!(cluster.ensure_namespace("ns").await.is_err());
        cluster.clear_failures();
        assert!(cluster.ensure_namespace("ns").await.is_ok());
    }
}
