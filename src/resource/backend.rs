//! httpbin backend: Deployment + Service

use super::{deleting, to_model, ClusterObject, Finalizer, Labels, TestResource};
use crate::cluster::{ClusterHandle, Gvr};
use crate::error::HarnessError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Port httpbin listens on, and the Service exposes
pub const BACKEND_PORT: u16 = 8080;

/// Echo backend every route points at
pub struct Backend {
    name: String,
    cluster: Arc<dyn ClusterHandle>,
    deployment: ClusterObject,
    service: ClusterObject,
}

impl Backend {
    /// Desired httpbin Deployment and Service, not yet committed
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        image: &str,
        labels: &Labels,
    ) -> Result<Self, HarnessError> {
        let project = cluster.project().to_string();

        let mut pod_labels = labels.clone();
        pod_labels.insert("deployment".to_string(), name.to_string());

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(project.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(
                        [("deployment".to_string(), name.to_string())]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "httpbin".to_string(),
                            image: Some(image.to_string()),
                            ports: Some(vec![ContainerPort {
                                container_port: i32::from(BACKEND_PORT),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let service = Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(project),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(
                    [("deployment".to_string(), name.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: i32::from(BACKEND_PORT),
                    target_port: Some(IntOrString::Int(i32::from(BACKEND_PORT))),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Self {
            name: name.to_string(),
            deployment: ClusterObject::new(
                cluster.clone(),
                Gvr::deployment(),
                name,
                to_model(&deployment)?,
            ),
            service: ClusterObject::new(cluster.clone(), Gvr::service(), name, to_model(&service)?),
            cluster,
        })
    }

    /// Gateway API `backendRef` pointing at the Service
    #[must_use]
    pub fn reference(&self) -> Value {
        json!({
            "group": "",
            "kind": "Service",
            "name": self.name,
            "namespace": self.cluster.project(),
            "port": BACKEND_PORT,
        })
    }

    /// In-cluster address of the Service
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.cluster.project())
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        BACKEND_PORT
    }

    #[must_use]
    pub fn deployment(&self) -> &ClusterObject {
        &self.deployment
    }
}

#[async_trait]
impl TestResource for Backend {
    fn kind(&self) -> &str {
        "Backend"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        &self.cluster
    }

    fn is_committed(&self) -> bool {
        self.deployment.is_committed() && self.service.is_committed()
    }

    async fn commit(&mut self) -> Result<(), HarnessError> {
        self.deployment.commit().await?;

        if let Err(e) = self.service.commit().await {
            // Not registered with any scope yet, so roll back here
            if let Err(rollback) = self.deployment.object_ref().delete().await {
                warn!(name = %self.name, error = %rollback, "Failed to roll back Deployment");
            }
            return Err(e);
        }
        Ok(())
    }

    fn finalizer(&self) -> Finalizer {
        deleting(vec![self.service.object_ref(), self.deployment.object_ref()])
    }

    async fn delete(&self) -> Result<(), HarnessError> {
        self.finalizer()().await
    }
}
