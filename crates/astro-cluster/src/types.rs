//! Workload, status and member types exchanged with the cluster adapter

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use astro_common::{LABEL_APP, LABEL_MANAGED_BY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an application
///
/// `Pending`, `Starting`, `Running` and `Stopped` are derived from the
/// cluster; `Stopping` and `Restarting` are only ever set optimistically by
/// the controller; `Unknown` means the workload object does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// Desired replicas set, none ready yet
    Pending,
    /// Some but not all replicas ready
    Starting,
    /// All desired replicas ready
    Running,
    /// Scale-down in progress
    Stopping,
    /// Zero desired replicas
    Stopped,
    /// Rolling restart requested
    Restarting,
    /// No workload object on the cluster
    Unknown,
}

impl AppStatus {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Starting => "starting",
            AppStatus::Running => "running",
            AppStatus::Stopping => "stopping",
            AppStatus::Stopped => "stopped",
            AppStatus::Restarting => "restarting",
            AppStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that is not one of the known [`AppStatus`] values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown application status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AppStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppStatus::Pending),
            "starting" => Ok(AppStatus::Starting),
            "running" => Ok(AppStatus::Running),
            "stopping" => Ok(AppStatus::Stopping),
            "stopped" => Ok(AppStatus::Stopped),
            "restarting" => Ok(AppStatus::Restarting),
            "unknown" => Ok(AppStatus::Unknown),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Derive the application status from desired and ready replica counts.
///
/// Checks run in a fixed order; zero desired replicas wins regardless of how
/// many replicas still report ready. A missing count is treated as zero.
pub fn derive_status(desired: Option<i32>, ready: Option<i32>) -> AppStatus {
    let desired = desired.unwrap_or(0);
    let ready = ready.unwrap_or(0);

    if desired == 0 {
        AppStatus::Stopped
    } else if ready == desired {
        AppStatus::Running
    } else if ready == 0 {
        AppStatus::Pending
    } else {
        AppStatus::Starting
    }
}

/// Everything needed to create a workload, derived fresh from an application
/// record for each mutating call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Workload name (also the container and exposure name)
    pub name: String,
    /// Owner namespace
    pub namespace: String,
    /// Container image reference
    pub image: String,
    /// Desired replica count
    pub replicas: i32,
    /// Container port to expose; `None` or `Some(0)` means no exposure
    pub port: Option<u16>,
    /// Caller-supplied labels merged over the default set
    pub labels: BTreeMap<String, String>,
}

impl WorkloadSpec {
    /// Create a spec with no port and no extra labels
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
        replicas: i32,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: image.into(),
            replicas,
            port: None,
            labels: BTreeMap::new(),
        }
    }

    /// Set the container port
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Add caller labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// The port to expose, if any
    pub fn exposed_port(&self) -> Option<u16> {
        self.port.filter(|p| *p > 0)
    }

    /// Selector matching every object of this workload (`app=<name>`)
    pub fn selector(&self) -> BTreeMap<String, String> {
        selector_for(&self.name)
    }

    /// Default labels merged with caller labels.
    ///
    /// `app` always equals the workload name because it is the selector.
    pub fn labels(&self, managed_by: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), managed_by.to_string());
        labels.extend(self.labels.clone());
        labels.insert(LABEL_APP.to_string(), self.name.clone());
        labels
    }
}

/// Selector for the objects of the named workload
pub fn selector_for(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_APP.to_string(), name.to_string())])
}

/// Summary of one member process (pod)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Pod name
    pub name: String,
    /// Pod phase as reported by the cluster (`Running`, `Pending`, ...)
    pub phase: String,
    /// Whether the pod's Ready condition is true
    pub ready: bool,
}

/// The orchestrator's current view of a workload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Derived status
    pub status: AppStatus,
    /// Replicas passing readiness
    pub ready_replicas: i32,
    /// Desired replicas as currently set on the cluster
    pub replicas: i32,
    /// Member processes matching the workload selector
    pub members: Vec<MemberInfo>,
}

impl StatusInfo {
    /// Status reported for a workload object that does not exist
    pub fn unknown() -> Self {
        Self {
            status: AppStatus::Unknown,
            ready_replicas: 0,
            replicas: 0,
            members: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_desired_is_stopped_regardless_of_ready() {
        for ready in [None, Some(0), Some(1), Some(2), Some(7)] {
            assert_eq!(derive_status(Some(0), ready), AppStatus::Stopped);
            assert_eq!(derive_status(None, ready), AppStatus::Stopped);
        }
    }

    #[test]
    fn status_derivation_over_small_grid() {
        for desired in 1..=6 {
            assert_eq!(derive_status(Some(desired), Some(desired)), AppStatus::Running);
            assert_eq!(derive_status(Some(desired), Some(0)), AppStatus::Pending);
            assert_eq!(derive_status(Some(desired), None), AppStatus::Pending);
            for ready in 1..desired {
                assert_eq!(
                    derive_status(Some(desired), Some(ready)),
                    AppStatus::Starting,
                    "desired={desired} ready={ready}"
                );
            }
        }
    }

    #[test]
    fn derivation_examples() {
        assert_eq!(derive_status(Some(3), Some(3)), AppStatus::Running);
        assert_eq!(derive_status(Some(3), Some(1)), AppStatus::Starting);
        assert_eq!(derive_status(Some(0), Some(2)), AppStatus::Stopped);
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in [
            AppStatus::Pending,
            AppStatus::Starting,
            AppStatus::Running,
            AppStatus::Stopping,
            AppStatus::Stopped,
            AppStatus::Restarting,
            AppStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<AppStatus>(), Ok(status));
        }
        assert_eq!(
            "crashed".parse::<AppStatus>(),
            Err(UnknownStatus("crashed".to_string()))
        );
    }

    #[test]
    fn caller_labels_merge_over_defaults_but_not_over_app() {
        let spec = WorkloadSpec::new("web", "astro-user-7", "nginx:1.27", 2).with_labels(
            BTreeMap::from([
                ("tier".to_string(), "frontend".to_string()),
                ("app".to_string(), "spoofed".to_string()),
                ("managed-by".to_string(), "someone-else".to_string()),
            ]),
        );
        let labels = spec.labels("astro");
        assert_eq!(labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("frontend"));
        assert_eq!(
            labels.get("managed-by").map(String::as_str),
            Some("someone-else")
        );
        assert_eq!(spec.selector(), selector_for("web"));
    }

    #[test]
    fn zero_port_is_not_exposed() {
        let spec = WorkloadSpec::new("web", "ns", "img", 1);
        assert_eq!(spec.exposed_port(), None);
        assert_eq!(spec.clone().with_port(Some(0)).exposed_port(), None);
        assert_eq!(spec.with_port(Some(8080)).exposed_port(), Some(8080));
    }

    #[test]
    fn unknown_status_info_is_empty() {
        let info = StatusInfo::unknown();
        assert_eq!(info.status, AppStatus::Unknown);
        assert_eq!(info.replicas, 0);
        assert!(info.members.is_empty());
    }
}
