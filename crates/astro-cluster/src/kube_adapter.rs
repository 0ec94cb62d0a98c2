//! kube-rs implementation of [`ClusterAdapter`]
//!
//! Maps the capability set onto core Kubernetes objects:
//! - namespace -> `Namespace` labelled `managed-by=<managed_by>`
//! - workload -> `Deployment` with a single container
//! - exposure -> `Service` selecting `app=<name>`
//! - member process -> `Pod` selected by `app=<name>`

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, Pod, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use tracing::{debug, info, instrument};

use astro_common::kube_utils::{is_conflict, is_not_found, label_selector};
use astro_common::{
    DEFAULT_FIELD_MANAGER, DEFAULT_MANAGED_BY, LABEL_MANAGED_BY, RESTARTED_AT_ANNOTATION,
};

use crate::adapter::ClusterAdapter;
use crate::error::{ClusterError, ClusterStep};
use crate::types::{derive_status, selector_for, MemberInfo, StatusInfo, WorkloadSpec};

/// Production adapter talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterAdapter {
    client: Client,
    managed_by: String,
    field_manager: String,
}

impl KubeClusterAdapter {
    /// Create an adapter with the default `managed-by` label and field manager
    pub fn new(client: Client) -> Self {
        Self {
            client,
            managed_by: DEFAULT_MANAGED_BY.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }

    /// Override the `managed-by` label value
    pub fn with_managed_by(mut self, managed_by: impl Into<String>) -> Self {
        self.managed_by = managed_by.into();
        self
    }

    /// Override the field manager recorded on writes
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_members(&self, name: &str, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().labels(&label_selector(&selector_for(name)));
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::ListMembers, e))?;
        Ok(pods.items)
    }

    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, ClusterError> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::GetWorkload, e))
    }

    /// Write back a modified Deployment without a resourceVersion, making
    /// the update unconditional (last writer wins).
    async fn replace_unconditionally(
        &self,
        name: &str,
        namespace: &str,
        mut deployment: Deployment,
    ) -> Result<(), ClusterError> {
        deployment.metadata.resource_version = None;
        self.deployments(namespace)
            .replace(name, &self.post_params(), &deployment)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::UpdateWorkload, e))?;
        Ok(())
    }
}

#[async_trait]
impl ClusterAdapter for KubeClusterAdapter {
    #[instrument(skip(self))]
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        let existing = api
            .get_opt(namespace)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::EnsureNamespace, e))?;
        if existing.is_some() {
            return Ok(());
        }

        let ns = build_namespace(namespace, &self.managed_by);
        match api.create(&self.post_params(), &ns).await {
            Ok(_) => {
                info!(namespace = %namespace, "created namespace");
                Ok(())
            }
            Err(e) if is_conflict(&e) => {
                debug!(namespace = %namespace, "namespace created concurrently");
                Ok(())
            }
            Err(e) => Err(ClusterError::kube(ClusterStep::EnsureNamespace, e)),
        }
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, namespace = %spec.namespace))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        self.ensure_namespace(&spec.namespace).await?;

        let labels = spec.labels(&self.managed_by);

        let deployment = build_deployment(spec, &labels);
        self.deployments(&spec.namespace)
            .create(&self.post_params(), &deployment)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::CreateWorkload, e))?;
        info!(replicas = spec.replicas, image = %spec.image, "created deployment");

        if let Some(port) = spec.exposed_port() {
            let service = build_service(spec, &labels, port);
            self.services(&spec.namespace)
                .create(&self.post_params(), &service)
                .await
                .map_err(|e| ClusterError::kube(ClusterStep::CreateExposure, e))?;
            info!(port, "created service");
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => info!("deleted deployment"),
            Err(e) if is_not_found(&e) => debug!("deployment already absent"),
            Err(e) => return Err(ClusterError::kube(ClusterStep::DeleteWorkload, e)),
        }

        match self
            .services(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => info!("deleted service"),
            Err(e) if is_not_found(&e) => debug!("service already absent"),
            Err(e) => return Err(ClusterError::kube(ClusterStep::DeleteExposure, e)),
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn scale_workload(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let mut deployment = self.get_deployment(name, namespace).await?;
        let spec = deployment
            .spec
            .as_mut()
            .ok_or_else(|| ClusterError::MissingSpec {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        spec.replicas = Some(replicas);

        self.replace_unconditionally(name, namespace, deployment)
            .await?;
        info!("scaled deployment");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_status(&self, name: &str, namespace: &str) -> Result<StatusInfo, ClusterError> {
        let deployment = match self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::GetWorkload, e))?
        {
            Some(deployment) => deployment,
            None => {
                debug!("deployment not found, status unknown");
                return Ok(StatusInfo::unknown());
            }
        };

        let members = self
            .list_members(name, namespace)
            .await?
            .iter()
            .map(member_info)
            .collect();

        let desired = deployment.spec.as_ref().and_then(|s| s.replicas);
        let ready = deployment.status.as_ref().and_then(|s| s.ready_replicas);

        Ok(StatusInfo {
            status: derive_status(desired, ready),
            ready_replicas: ready.unwrap_or(0),
            replicas: desired.unwrap_or(0),
            members,
        })
    }

    #[instrument(skip(self))]
    async fn restart_workload(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let mut deployment = self.get_deployment(name, namespace).await?;
        let spec = deployment
            .spec
            .as_mut()
            .ok_or_else(|| ClusterError::MissingSpec {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        stamp_restart(
            &mut spec.template,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        self.replace_unconditionally(name, namespace, deployment)
            .await?;
        info!("triggered rolling restart");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_logs(
        &self,
        name: &str,
        namespace: &str,
        lines: i64,
    ) -> Result<String, ClusterError> {
        let pods = self.list_members(name, namespace).await?;
        let pod_name = pods
            .first()
            .and_then(|pod| pod.metadata.name.clone())
            .ok_or_else(|| ClusterError::NoMembers {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        let params = LogParams {
            tail_lines: Some(lines),
            ..Default::default()
        };
        debug!(pod = %pod_name, lines, "fetching logs");
        self.pods(namespace)
            .logs(&pod_name, &params)
            .await
            .map_err(|e| ClusterError::kube(ClusterStep::FetchLogs, e))
    }
}

/// Build the owner namespace with the ownership label
pub fn build_namespace(name: &str, managed_by: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                managed_by.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build the single-container Deployment for a workload spec
pub fn build_deployment(spec: &WorkloadSpec, labels: &BTreeMap<String, String>) -> Deployment {
    let ports = spec.exposed_port().map(|port| {
        vec![ContainerPort {
            container_port: i32::from(port),
            ..Default::default()
        }]
    });

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(spec.selector()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: spec.name.clone(),
                        image: Some(spec.image.clone()),
                        ports,
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service exposing `port` on the workload's pods
pub fn build_service(spec: &WorkloadSpec, labels: &BTreeMap<String, String>, port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(spec.selector()),
            ports: Some(vec![ServicePort {
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Set the restart marker annotation on a pod template
pub fn stamp_restart(template: &mut PodTemplateSpec, timestamp: String) {
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(RESTARTED_AT_ANNOTATION.to_string(), timestamp);
}

/// Summarize a pod; readiness comes from its `Ready` condition
pub fn member_info(pod: &Pod) -> MemberInfo {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    MemberInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready,
    }
}
