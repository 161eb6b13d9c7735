//! Standalone Authorino instance managed by authorino-operator

use super::{deleting, metadata, ClusterObject, Finalizer, Labels, TestResource};
use crate::cluster::{ClusterHandle, Gvr};
use crate::error::HarnessError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// gRPC port of the authorization service
pub const AUTHORIZATION_PORT: u16 = 50051;

/// What a gateway needs to call an Authorino instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorinoRef {
    pub name: String,
    pub namespace: String,
}

impl AuthorinoRef {
    /// Name of the authorization Service the operator creates
    #[must_use]
    pub fn authorization_service(&self) -> String {
        format!("{}-authorino-authorization", self.name)
    }

    /// Cluster-local address of the authorization Service
    #[must_use]
    pub fn authorization_address(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.authorization_service(),
            self.namespace
        )
    }

    #[must_use]
    pub fn authorization_port(&self) -> u16 {
        AUTHORIZATION_PORT
    }
}

/// Authorino custom resource
pub struct Authorino {
    object: ClusterObject,
}

impl Authorino {
    /// Namespaced Authorino with TLS off, watching AuthConfigs labelled by
    /// `selector` when given
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        labels: &Labels,
        selector: Option<&str>,
    ) -> Self {
        let mut spec = json!({
            "clusterWide": false,
            "listener": {"tls": {"enabled": false}},
            "oidcServer": {"tls": {"enabled": false}},
            "replicas": 1,
        });
        if let (Some(selector), Some(spec)) = (selector, spec.as_object_mut()) {
            spec.insert("authConfigLabelSelectors".to_string(), json!(selector));
        }

        let gvr = Gvr::authorino();
        let model = json!({
            "apiVersion": gvr.api_version(),
            "kind": &gvr.kind,
            "metadata": metadata(name, cluster.project(), labels),
            "spec": spec,
        });

        Self {
            object: ClusterObject::new(cluster, gvr, name, model),
        }
    }

    #[must_use]
    pub fn reference(&self) -> AuthorinoRef {
        AuthorinoRef {
            name: self.object.name().to_string(),
            namespace: self.object.cluster().project().to_string(),
        }
    }

    #[must_use]
    pub fn spec(&self) -> Option<&Value> {
        self.object.model().get("spec")
    }
}

#[async_trait]
impl TestResource for Authorino {
    fn kind(&self) -> &str {
        "Authorino"
    }

    fn name(&self) -> &str {
        self.object.name()
    }

    fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        self.object.cluster()
    }

    fn is_committed(&self) -> bool {
        self.object.is_committed()
    }

    async fn commit(&mut self) -> Result<(), HarnessError> {
        self.object.commit().await
    }

    fn finalizer(&self) -> Finalizer {
        deleting(vec![self.object.object_ref()])
    }

    async fn delete(&self) -> Result<(), HarnessError> {
        self.object.object_ref().delete().await
    }
}
