//! Lifecycle error types

use std::fmt;

use astro_cluster::ClusterError;

use crate::model::{AppId, OwnerId};
use crate::store::StoreError;

/// Coarse classification of a [`LifecycleError`], for mapping onto an outer
/// protocol (HTTP status, process exit code)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The application, or something it needs, does not exist
    NotFound,
    /// Name already taken for the owner
    Conflict,
    /// The caller does not own the application
    Forbidden,
    /// Rejected input
    Validation,
    /// A cluster call failed
    ClusterOperationFailed,
    /// The record store failed
    PersistenceFailed,
}

impl ErrorKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "validation",
            ErrorKind::ClusterOperationFailed => "cluster_operation_failed",
            ErrorKind::PersistenceFailed => "persistence_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a lifecycle command
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// No record with this id
    #[error("application {id} not found")]
    NotFound {
        /// Requested application
        id: AppId,
    },

    /// The application exists but has no member process to read logs from
    #[error("application {id} has no running member processes")]
    NoMembers {
        /// Requested application
        id: AppId,
    },

    /// The owner already has an application with this name
    #[error("application '{name}' already exists for owner {owner}")]
    Conflict {
        /// Requesting owner
        owner: OwnerId,
        /// Taken name
        name: String,
    },

    /// The record belongs to another owner
    #[error("application {id} is not owned by {owner}")]
    Forbidden {
        /// Requested application
        id: AppId,
        /// Requesting owner
        owner: OwnerId,
    },

    /// Input rejected before anything was touched
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending input field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A cluster call failed; the source names the step
    #[error("cluster operation failed: {source}")]
    ClusterOperationFailed {
        /// Adapter error
        #[from]
        source: ClusterError,
    },

    /// The record store failed
    #[error("persistence failed: {source}")]
    PersistenceFailed {
        /// Store error
        #[from]
        source: StoreError,
    },
}

impl LifecycleError {
    /// Validation failure for `field`
    pub fn validation(field: &'static str, msg: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: msg.into(),
        }
    }

    /// Coarse classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound { .. } | LifecycleError::NoMembers { .. } => {
                ErrorKind::NotFound
            }
            LifecycleError::Conflict { .. } => ErrorKind::Conflict,
            LifecycleError::Forbidden { .. } => ErrorKind::Forbidden,
            LifecycleError::Validation { .. } => ErrorKind::Validation,
            LifecycleError::ClusterOperationFailed { .. } => ErrorKind::ClusterOperationFailed,
            LifecycleError::PersistenceFailed { .. } => ErrorKind::PersistenceFailed,
        }
    }

    /// The failed cluster sub-step, for cluster failures
    pub fn cluster_step(&self) -> Option<astro_cluster::ClusterStep> {
        match self {
            LifecycleError::ClusterOperationFailed { source } => Some(source.step()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astro_cluster::ClusterStep;

    #[test]
    fn cluster_errors_keep_their_step() {
        let err: LifecycleError =
            ClusterError::backend(ClusterStep::CreateExposure, "port taken").into();
        assert_eq!(err.kind(), ErrorKind::ClusterOperationFailed);
        assert_eq!(err.cluster_step(), Some(ClusterStep::CreateExposure));
        assert_eq!(
            err.to_string(),
            "cluster operation failed: create-exposure failed: port taken"
        );
    }

    #[test]
    fn kinds_and_messages() {
        let err = LifecycleError::Forbidden {
            id: AppId(3),
            owner: OwnerId(9),
        };
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "application 3 is not owned by 9");
        assert_eq!(err.cluster_step(), None);

        let err: LifecycleError = StoreError::Backend("disk full".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);

        let err = LifecycleError::validation("replicas", "must be between 0 and 10");
        assert_eq!(err.kind().as_str(), "validation");
        assert_eq!(err.to_string(), "invalid replicas: must be between 0 and 10");
    }

    #[test]
    fn missing_members_are_not_found_with_their_own_message() {
        let err = LifecycleError::NoMembers { id: AppId(4) };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "application 4 has no running member processes");
    }
}
