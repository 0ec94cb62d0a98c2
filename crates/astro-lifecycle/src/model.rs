//! Persisted application records and the namespace policy

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use astro_cluster::{AppStatus, WorkloadSpec};
use astro_common::DEFAULT_NAMESPACE_PREFIX;

/// Opaque application identity assigned by the record store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AppId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AppId)
    }
}

/// Authenticated owner identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OwnerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(OwnerId)
    }
}

/// A persisted application record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Store-assigned identity
    pub id: AppId,
    /// Owner that created the application and exclusively controls it
    pub owner: OwnerId,
    /// Application name, unique per owner
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Last persisted desired replica count
    pub replicas: i32,
    /// Exposed port, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Caller labels applied to the workload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Namespace derived from the owner
    pub namespace: String,
    /// Last known status
    pub status: AppStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Build the workload spec for cluster-side creation
    pub fn workload_spec(&self) -> WorkloadSpec {
        WorkloadSpec::new(&self.name, &self.namespace, &self.image, self.replicas)
            .with_port(self.port)
            .with_labels(self.labels.clone())
    }

    /// Whether `owner` may act on this application
    pub fn is_owned_by(&self, owner: OwnerId) -> bool {
        self.owner == owner
    }
}

/// Fields of a record about to be created; the store assigns id and timestamps
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApplication {
    /// Owning user
    pub owner: OwnerId,
    /// Name, unique per owner
    pub name: String,
    /// Container image
    pub image: String,
    /// Desired replica count
    pub replicas: i32,
    /// Exposed port, if any
    pub port: Option<u16>,
    /// Extra workload labels
    pub labels: BTreeMap<String, String>,
    /// Namespace derived from the owner
    pub namespace: String,
    /// Initial status
    pub status: AppStatus,
}

impl NewApplication {
    /// Materialize the record with the given id and creation time
    pub fn into_application(self, id: AppId, now: DateTime<Utc>) -> Application {
        Application {
            id,
            owner: self.owner,
            name: self.name,
            image: self.image,
            replicas: self.replicas,
            port: self.port,
            labels: self.labels,
            namespace: self.namespace,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a record; only status and replicas are mutable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// New status, if changed
    pub status: Option<AppStatus>,
    /// New replica count, if changed
    pub replicas: Option<i32>,
}

impl RecordUpdate {
    /// Update only the status
    pub fn status(status: AppStatus) -> Self {
        Self {
            status: Some(status),
            replicas: None,
        }
    }

    /// Also update the replica count
    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// Apply to a record, stamping `updated_at`
    pub fn apply(&self, app: &mut Application, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            app.status = status;
        }
        if let Some(replicas) = self.replicas {
            app.replicas = replicas;
        }
        app.updated_at = now;
    }
}

/// Maps an owner to its namespace
///
/// Pure: every application of one owner lands in the same namespace and
/// distinct owners never share one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacePolicy {
    prefix: String,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_PREFIX)
    }
}

impl NamespacePolicy {
    /// Policy producing `<prefix><owner>`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Namespace for the owner
    pub fn namespace_for(&self, owner: OwnerId) -> String {
        format!("{}{}", self.prefix, owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Application {
        NewApplication {
            owner: OwnerId(7),
            name: "web".to_string(),
            image: "x:1".to_string(),
            replicas: 3,
            port: Some(8080),
            labels: BTreeMap::from([("tier".to_string(), "frontend".to_string())]),
            namespace: "astro-user-7".to_string(),
            status: AppStatus::Pending,
        }
        .into_application(AppId(1), Utc::now())
    }

    #[test]
    fn namespace_is_a_function_of_owner() {
        let policy = NamespacePolicy::default();
        assert_eq!(policy.namespace_for(OwnerId(7)), "astro-user-7");
        assert_eq!(
            policy.namespace_for(OwnerId(7)),
            policy.namespace_for(OwnerId(7))
        );
        assert_ne!(
            policy.namespace_for(OwnerId(7)),
            policy.namespace_for(OwnerId(70))
        );
        assert_eq!(NamespacePolicy::new("team-").namespace_for(OwnerId(3)), "team-3");
    }

    #[test]
    fn workload_spec_comes_from_the_record() {
        let spec = sample().workload_spec();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.namespace, "astro-user-7");
        assert_eq!(spec.image, "x:1");
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.exposed_port(), Some(8080));
        assert_eq!(spec.labels.get("tier").map(String::as_str), Some("frontend"));
    }

    #[test]
    fn update_touches_only_named_fields() {
        let mut app = sample();
        let before = app.clone();
        let later = before.updated_at + chrono::Duration::seconds(5);

        RecordUpdate::status(AppStatus::Running).apply(&mut app, later);
        assert_eq!(app.status, AppStatus::Running);
        assert_eq!(app.replicas, before.replicas);
        assert_eq!(app.updated_at, later);
        assert_eq!(app.created_at, before.created_at);

        RecordUpdate::status(AppStatus::Stopped)
            .with_replicas(0)
            .apply(&mut app, later);
        assert_eq!(app.replicas, 0);
        assert_eq!(app.image, before.image);
    }

    #[test]
    fn record_serializes_status_lowercase() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["id"], 1);
        assert_eq!(json["owner"], 7);
    }

    #[test]
    fn ids_parse_from_strings() {
        assert_eq!("42".parse::<AppId>(), Ok(AppId(42)));
        assert!("web".parse::<AppId>().is_err());
        assert_eq!("7".parse::<OwnerId>(), Ok(OwnerId(7)));
    }
}
