//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction and structured classification of API errors. Callers
//! match on status codes rather than error strings.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a kubeconfig the configuration is inferred (in-cluster service
/// account first, then `KUBECONFIG` / `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check if an error is an API "not found" (404)
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Check if an error is an API "already exists" / conflict (409)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Render labels as an equality-based label selector (`a=b,c=d`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_not_found() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(409, "AlreadyExists")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
    }

    #[test]
    fn classifies_conflict() {
        assert!(is_conflict(&api_error(409, "AlreadyExists")));
        assert!(!is_conflict(&api_error(404, "NotFound")));
    }

    #[test]
    fn label_selector_is_sorted_and_comma_joined() {
        let mut labels = BTreeMap::new();
        labels.insert("managed-by".to_string(), "astro".to_string());
        labels.insert("app".to_string(), "web".to_string());
        assert_eq!(label_selector(&labels), "app=web,managed-by=astro");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }
}
