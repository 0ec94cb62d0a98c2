//! Lifecycle controller
//!
//! Maps lifecycle commands onto cluster operations and record mutations:
//!
//! | Command  | Cluster                       | Record                          | Reconcile |
//! |----------|-------------------------------|---------------------------------|-----------|
//! | create   | create workload               | insert `pending` first, removed if the cluster fails | async |
//! | delete   | delete workload               | removed only after cluster success | - |
//! | start    | scale to persisted count (min 1) | `starting`                   | async |
//! | stop     | scale to 0                    | `stopped`, replicas 0           | - |
//! | restart  | stamp pod template            | `restarting`                    | async |
//! | list     | -                             | read                            | async, one per record |
//! | get      | status query                  | read after refresh              | sync |
//! | logs     | tail one member               | -                               | - |
//!
//! Every command checks ownership before touching the cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use astro_cluster::{AppStatus, ClusterAdapter};
use astro_common::DEFAULT_LOG_LINES;

use crate::error::LifecycleError;
use crate::model::{AppId, Application, NamespacePolicy, NewApplication, OwnerId, RecordUpdate};
use crate::reconciler::StatusReconciler;
use crate::scheduler::{ReconcileRequest, ReconcileScheduler};
use crate::store::{RecordStore, StoreError};

/// Upper bound on desired replicas accepted by `create`
pub const MAX_REPLICAS: i32 = 10;

/// Longest name accepted; names become Kubernetes object names
pub const MAX_NAME_LEN: usize = 63;

/// Input to [`LifecycleController::create`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateApplication {
    /// DNS-1123 label, unique per owner
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Desired replicas, `0..=MAX_REPLICAS`
    pub replicas: i32,
    /// Port to expose; `None` or `Some(0)` creates no exposure resource
    #[serde(default)]
    pub port: Option<u16>,
    /// Extra workload labels; `app` is always the name
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl CreateApplication {
    /// Request without port or extra labels
    pub fn new(name: impl Into<String>, image: impl Into<String>, replicas: i32) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            replicas,
            ..Default::default()
        }
    }

    /// Expose `port`
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add one workload label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> Result<(), LifecycleError> {
        validate_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(LifecycleError::validation("image", "must not be empty"));
        }
        if !(0..=MAX_REPLICAS).contains(&self.replicas) {
            return Err(LifecycleError::validation(
                "replicas",
                format!("must be between 0 and {MAX_REPLICAS}, got {}", self.replicas),
            ));
        }
        Ok(())
    }
}

/// DNS-1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if name.is_empty() {
        return Err(LifecycleError::validation("name", "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LifecycleError::validation(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    if !name.chars().all(valid_char) {
        return Err(LifecycleError::validation(
            "name",
            format!("'{name}' may only contain lowercase letters, digits and '-'"),
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(LifecycleError::validation(
            "name",
            format!("'{name}' must start and end with a letter or digit"),
        ));
    }
    Ok(())
}

/// Executes lifecycle commands on behalf of authenticated owners
pub struct LifecycleController {
    cluster: Arc<dyn ClusterAdapter>,
    store: Arc<dyn RecordStore>,
    scheduler: Arc<dyn ReconcileScheduler>,
    reconciler: Arc<StatusReconciler>,
    namespaces: NamespacePolicy,
    default_log_lines: i64,
}

impl LifecycleController {
    /// Wire a controller; the reconciler shares the same cluster and store
    pub fn new(
        cluster: Arc<dyn ClusterAdapter>,
        store: Arc<dyn RecordStore>,
        scheduler: Arc<dyn ReconcileScheduler>,
    ) -> Self {
        let reconciler = Arc::new(StatusReconciler::new(cluster.clone(), store.clone()));
        Self {
            cluster,
            store,
            scheduler,
            reconciler,
            namespaces: NamespacePolicy::default(),
            default_log_lines: DEFAULT_LOG_LINES,
        }
    }

    /// Replace the owner-to-namespace mapping
    pub fn with_namespace_policy(mut self, namespaces: NamespacePolicy) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Tail length used when `get_logs` is called with a non-positive count
    pub fn with_default_log_lines(mut self, lines: i64) -> Self {
        self.default_log_lines = lines;
        self
    }

    /// Create an application.
    ///
    /// The record is written as `pending` before the cluster is touched. If
    /// cluster-side creation fails the record is removed again and the error
    /// names the failed step; a workload that did get created (exposure
    /// failure) is left on the cluster.
    #[instrument(skip_all, fields(owner = %owner, name = %request.name))]
    pub async fn create(
        &self,
        owner: OwnerId,
        request: CreateApplication,
    ) -> Result<Application, LifecycleError> {
        request.validate()?;

        if self
            .store
            .find_by_owner_and_name(owner, &request.name)
            .await?
            .is_some()
        {
            return Err(LifecycleError::Conflict {
                owner,
                name: request.name,
            });
        }

        let namespace = self.namespaces.namespace_for(owner);
        let app = self
            .store
            .create(NewApplication {
                owner,
                name: request.name,
                image: request.image,
                replicas: request.replicas,
                port: request.port.filter(|p| *p > 0),
                labels: request.labels,
                namespace,
                status: AppStatus::Pending,
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { owner, name } => LifecycleError::Conflict { owner, name },
                other => LifecycleError::from(other),
            })?;

        if let Err(e) = self.cluster.create_workload(&app.workload_spec()).await {
            error!(app_id = %app.id, step = %e.step(), error = %e, "cluster creation failed, removing record");
            if let Err(cleanup) = self.store.delete(app.id).await {
                error!(app_id = %app.id, error = %cleanup, "failed to remove record after cluster failure");
            }
            return Err(e.into());
        }

        info!(app_id = %app.id, namespace = %app.namespace, "application created");
        self.schedule_reconcile(&app);
        Ok(app)
    }

    /// Delete an application. The record is removed only after the cluster
    /// side is gone; on cluster failure it stays as it was.
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn delete(&self, id: AppId, owner: OwnerId) -> Result<(), LifecycleError> {
        let app = self.load_owned(id, owner).await?;

        self.cluster
            .delete_workload(&app.name, &app.namespace)
            .await?;
        self.store.delete(id).await?;

        info!("application deleted");
        Ok(())
    }

    /// Scale back to the last persisted replica count, or 1 if that is 0
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn start(&self, id: AppId, owner: OwnerId) -> Result<(), LifecycleError> {
        let app = self.load_owned(id, owner).await?;
        let target = if app.replicas == 0 { 1 } else { app.replicas };

        self.cluster
            .scale_workload(&app.name, &app.namespace, target)
            .await?;
        self.record_best_effort(id, RecordUpdate::status(AppStatus::Starting))
            .await;

        info!(replicas = target, "application starting");
        self.schedule_reconcile(&app);
        Ok(())
    }

    /// Scale to zero; the record is updated directly with no reconciliation
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn stop(&self, id: AppId, owner: OwnerId) -> Result<(), LifecycleError> {
        let app = self.load_owned(id, owner).await?;

        self.cluster
            .scale_workload(&app.name, &app.namespace, 0)
            .await?;
        self.record_best_effort(id, RecordUpdate::status(AppStatus::Stopped).with_replicas(0))
            .await;

        info!("application stopped");
        Ok(())
    }

    /// Roll every member process; the replica count is unchanged
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn restart(&self, id: AppId, owner: OwnerId) -> Result<(), LifecycleError> {
        let app = self.load_owned(id, owner).await?;

        self.cluster
            .restart_workload(&app.name, &app.namespace)
            .await?;
        self.record_best_effort(id, RecordUpdate::status(AppStatus::Restarting))
            .await;

        info!("application restarting");
        self.schedule_reconcile(&app);
        Ok(())
    }

    /// All of the owner's records as persisted, each with a detached refresh
    /// scheduled
    #[instrument(skip_all, fields(owner = %owner))]
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<Application>, LifecycleError> {
        let apps = self.store.list_by_owner(owner).await?;
        for app in &apps {
            self.schedule_reconcile(app);
        }
        Ok(apps)
    }

    /// One record, reconciled against the cluster before it is returned
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn get(&self, id: AppId, owner: OwnerId) -> Result<Application, LifecycleError> {
        let app = self.load_owned(id, owner).await?;
        self.reconciler
            .reconcile(app.id, &app.name, &app.namespace)
            .await;
        self.store
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound { id })
    }

    /// Tail the logs of one member process; `lines <= 0` uses the default
    #[instrument(skip_all, fields(app_id = %id, owner = %owner))]
    pub async fn get_logs(
        &self,
        id: AppId,
        owner: OwnerId,
        lines: i64,
    ) -> Result<String, LifecycleError> {
        let app = self.load_owned(id, owner).await?;
        let lines = if lines > 0 {
            lines
        } else {
            self.default_log_lines
        };

        match self
            .cluster
            .fetch_logs(&app.name, &app.namespace, lines)
            .await
        {
            Ok(logs) => Ok(logs),
            Err(astro_cluster::ClusterError::NoMembers { .. }) => {
                Err(LifecycleError::NoMembers { id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_owned(&self, id: AppId, owner: OwnerId) -> Result<Application, LifecycleError> {
        let app = self
            .store
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound { id })?;
        if !app.is_owned_by(owner) {
            warn!(app_id = %id, owner = %owner, "ownership check failed");
            return Err(LifecycleError::Forbidden { id, owner });
        }
        Ok(app)
    }

    /// Record writes that follow a successful cluster call. The cluster change
    /// already happened, so a failed write is logged and not reported.
    async fn record_best_effort(&self, id: AppId, update: RecordUpdate) {
        if let Err(e) = self.store.update(id, update).await {
            warn!(app_id = %id, error = %e, "failed to persist lifecycle status");
        }
    }

    fn schedule_reconcile(&self, app: &Application) {
        self.reconciler
            .schedule(self.scheduler.as_ref(), ReconcileRequest::for_app(app));
    }
}
