//! Cluster adapter errors
//!
//! Composite operations issue several independent cluster writes. Every error
//! names the [`ClusterStep`] that failed so the caller can tell, for example,
//! a failed exposure creation (workload already live) from a failed workload
//! creation (nothing live).

use std::fmt;

use thiserror::Error;

/// One cluster-side sub-step of an adapter operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterStep {
    /// Namespace get/create
    EnsureNamespace,
    /// Workload (Deployment) creation
    CreateWorkload,
    /// Exposure (Service) creation
    CreateExposure,
    /// Workload deletion
    DeleteWorkload,
    /// Exposure deletion
    DeleteExposure,
    /// Workload read (scale, restart, status)
    GetWorkload,
    /// Workload write-back (scale, restart)
    UpdateWorkload,
    /// Member process (Pod) listing
    ListMembers,
    /// Log retrieval from a member process
    FetchLogs,
}

impl ClusterStep {
    /// Stable kebab-case name used in messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStep::EnsureNamespace => "ensure-namespace",
            ClusterStep::CreateWorkload => "create-workload",
            ClusterStep::CreateExposure => "create-exposure",
            ClusterStep::DeleteWorkload => "delete-workload",
            ClusterStep::DeleteExposure => "delete-exposure",
            ClusterStep::GetWorkload => "get-workload",
            ClusterStep::UpdateWorkload => "update-workload",
            ClusterStep::ListMembers => "list-members",
            ClusterStep::FetchLogs => "fetch-logs",
        }
    }
}

impl fmt::Display for ClusterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`crate::ClusterAdapter`] implementations
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The Kubernetes API rejected or failed a request
    #[error("{step} failed: {source}")]
    Kube {
        /// Sub-step that failed
        step: ClusterStep,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// A non-kube backend failed
    #[error("{step} failed: {message}")]
    Backend {
        /// Sub-step that failed
        step: ClusterStep,
        /// Description of what failed
        message: String,
    },

    /// No member process matches the workload selector
    #[error("no member processes found for {namespace}/{name}")]
    NoMembers {
        /// Workload name
        name: String,
        /// Workload namespace
        namespace: String,
    },

    /// The workload object has no spec to modify
    #[error("workload {namespace}/{name} has no spec")]
    MissingSpec {
        /// Workload name
        name: String,
        /// Workload namespace
        namespace: String,
    },
}

impl ClusterError {
    /// Wrap a kube error with the sub-step it came from
    pub fn kube(step: ClusterStep, source: kube::Error) -> Self {
        Self::Kube { step, source }
    }

    /// Create a backend error for the given sub-step
    pub fn backend(step: ClusterStep, msg: impl Into<String>) -> Self {
        Self::Backend {
            step,
            message: msg.into(),
        }
    }

    /// The sub-step that failed
    pub fn step(&self) -> ClusterStep {
        match self {
            ClusterError::Kube { step, .. } | ClusterError::Backend { step, .. } => *step,
            ClusterError::NoMembers { .. } => ClusterStep::ListMembers,
            ClusterError::MissingSpec { .. } => ClusterStep::GetWorkload,
        }
    }

    /// Whether the failure means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::Kube { source, .. } => astro_common::kube_utils::is_not_found(source),
            ClusterError::NoMembers { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn exposure_failure_is_distinguishable_from_workload_failure() {
        let exposure = ClusterError::backend(ClusterStep::CreateExposure, "port in use");
        let workload = ClusterError::backend(ClusterStep::CreateWorkload, "quota exceeded");

        assert_eq!(exposure.step(), ClusterStep::CreateExposure);
        assert_eq!(workload.step(), ClusterStep::CreateWorkload);
        assert_eq!(exposure.to_string(), "create-exposure failed: port in use");
    }

    #[test]
    fn kube_errors_carry_step_and_status() {
        let err = ClusterError::kube(
            ClusterStep::GetWorkload,
            kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "deployments.apps \"web\" not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            }),
        );
        assert_eq!(err.step(), ClusterStep::GetWorkload);
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("get-workload failed"));
    }

    #[test]
    fn no_members_is_a_not_found_condition() {
        let err = ClusterError::NoMembers {
            name: "web".to_string(),
            namespace: "astro-user-7".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.step(), ClusterStep::ListMembers);
        assert!(!ClusterError::backend(ClusterStep::FetchLogs, "eof").is_not_found());
    }
}
