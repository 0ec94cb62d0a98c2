//! Error types for the CLI

use astro_lifecycle::{ErrorKind, LifecycleError, StoreError};

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Common(#[from] astro_common::Error),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no owner given; pass --owner or set ASTRO_OWNER")]
    MissingOwner,
}

impl Error {
    /// Process exit code; lifecycle failures get one code per kind
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Lifecycle(e) => match e.kind() {
                ErrorKind::Validation => 2,
                ErrorKind::NotFound => 3,
                ErrorKind::Conflict => 4,
                ErrorKind::Forbidden => 5,
                ErrorKind::ClusterOperationFailed => 6,
                ErrorKind::PersistenceFailed => 7,
            },
            Error::MissingOwner => 2,
            Error::Store(_) => 7,
            Error::Common(_) | Error::Json(_) | Error::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astro_lifecycle::{AppId, OwnerId};
    use std::collections::HashSet;

    #[test]
    fn lifecycle_kinds_map_to_distinct_codes() {
        let errors = [
            LifecycleError::validation("name", "bad"),
            LifecycleError::NotFound { id: AppId(1) },
            LifecycleError::Conflict {
                owner: OwnerId(1),
                name: "web".to_string(),
            },
            LifecycleError::Forbidden {
                id: AppId(1),
                owner: OwnerId(2),
            },
            LifecycleError::ClusterOperationFailed {
                source: astro_cluster::ClusterError::backend(
                    astro_cluster::ClusterStep::CreateWorkload,
                    "boom",
                ),
            },
            LifecycleError::PersistenceFailed {
                source: StoreError::Backend("boom".to_string()),
            },
        ];
        let codes: HashSet<u8> = errors
            .into_iter()
            .map(|e| Error::from(e).exit_code())
            .collect();
        assert_eq!(codes.len(), 6);
        assert!(!codes.contains(&0) && !codes.contains(&1));
    }

    #[test]
    fn lifecycle_message_is_passed_through() {
        let err = Error::from(LifecycleError::NotFound { id: AppId(9) });
        assert_eq!(err.to_string(), "application 9 not found");
        assert_eq!(Error::MissingOwner.exit_code(), 2);
    }
}
