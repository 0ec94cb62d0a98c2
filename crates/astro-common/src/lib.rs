//! Common types for Astro: constants, errors, configuration and kube helpers

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default prefix for per-owner namespaces (`astro-user-<owner>`)
pub const DEFAULT_NAMESPACE_PREFIX: &str = "astro-user-";

/// Label key marking resources created by Astro
pub const LABEL_MANAGED_BY: &str = "managed-by";

/// Default value for [`LABEL_MANAGED_BY`]
pub const DEFAULT_MANAGED_BY: &str = "astro";

/// Label key selecting every object that belongs to one application
///
/// Used as the Deployment selector, the Service selector and the pod
/// selector for status and log queries.
pub const LABEL_APP: &str = "app";

/// Pod template annotation stamped to trigger a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Default field manager name for writes against the API server
pub const DEFAULT_FIELD_MANAGER: &str = "astro-controller";

/// Default number of log lines returned when the caller does not ask for a count
pub const DEFAULT_LOG_LINES: i64 = 100;
