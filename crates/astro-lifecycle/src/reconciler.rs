//! Best-effort status reconciliation
//!
//! Copies the cluster's view of one application into its persisted record.
//! Nothing here returns an error: a failed query or a failed write is logged
//! and dropped, and the record keeps its previous values.

use std::sync::Arc;

use tracing::{debug, info_span, warn, Instrument};

use astro_cluster::{AppStatus, ClusterAdapter};

use crate::model::{AppId, RecordUpdate};
use crate::scheduler::{ReconcileRequest, ReconcileScheduler};
use crate::store::RecordStore;

/// What a reconciliation pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record was updated; `replicas` is set when the count was written
    Applied {
        /// Status written
        status: AppStatus,
        /// Replica count written, if any
        replicas: Option<i32>,
    },
    /// The cluster query failed, nothing was written
    QueryFailed,
    /// The cluster answered but the record write failed
    WriteFailed,
}

/// Copies observed cluster state into application records
pub struct StatusReconciler {
    cluster: Arc<dyn ClusterAdapter>,
    store: Arc<dyn RecordStore>,
}

impl StatusReconciler {
    /// Reconciler reading from `cluster` and writing to `store`
    pub fn new(cluster: Arc<dyn ClusterAdapter>, store: Arc<dyn RecordStore>) -> Self {
        Self { cluster, store }
    }

    /// Refresh the record's status and replica count from the cluster.
    ///
    /// Status is always overwritten with the observed one. The replica count
    /// is only written when the cluster reports a positive desired count, so
    /// a persisted positive count never drops to zero here.
    pub async fn reconcile(&self, app_id: AppId, name: &str, namespace: &str) -> ReconcileOutcome {
        let observed = match self.cluster.query_status(name, namespace).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(app_id = %app_id, error = %e, "status query failed, skipping reconcile");
                return ReconcileOutcome::QueryFailed;
            }
        };

        let mut update = RecordUpdate::status(observed.status);
        if observed.replicas > 0 {
            update = update.with_replicas(observed.replicas);
        }

        if let Err(e) = self.store.update(app_id, update).await {
            warn!(app_id = %app_id, error = %e, "failed to persist reconciled status");
            return ReconcileOutcome::WriteFailed;
        }

        debug!(
            app_id = %app_id,
            status = %observed.status,
            ready = observed.ready_replicas,
            replicas = observed.replicas,
            "reconciled application status"
        );
        ReconcileOutcome::Applied {
            status: observed.status,
            replicas: update.replicas,
        }
    }

    /// Hand a detached reconciliation to the scheduler
    pub fn schedule(self: &Arc<Self>, scheduler: &dyn ReconcileScheduler, request: ReconcileRequest) {
        let reconciler = Arc::clone(self);
        let span = info_span!("reconcile", app_id = %request.app_id, namespace = %request.namespace);
        let task_request = request.clone();
        scheduler.schedule(
            request,
            Box::pin(
                async move {
                    reconciler
                        .reconcile(
                            task_request.app_id,
                            &task_request.name,
                            &task_request.namespace,
                        )
                        .await;
                }
                .instrument(span),
            ),
        );
    }
}
