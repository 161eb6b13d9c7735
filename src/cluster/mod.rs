//! Cluster handles
//!
//! A [`ClusterHandle`] is a connection to one project (namespace) of one
//! cluster. The harness only ever talks to clusters through this trait:
//!
//! - [`KubeCluster`]: kube-rs backed handle for real clusters
//! - [`MemoryCluster`]: in-memory cluster for tests and dry runs
//! - [`DisconnectedCluster`]: a configured target that could not be reached

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

mod disconnected;
mod kubernetes;
mod memory;

pub use kubernetes::KubeCluster;
pub use disconnected::DisconnectedCluster;
pub use memory::{ClusterCall, MemoryCluster};

/// Errors from cluster operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("cluster '{0}' is not connected")]
    Unavailable(String),

    #[error("{0}")]
    Api(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    pub(crate) fn not_found(gvr: &Gvr, name: &str) -> Self {
        Self::NotFound {
            kind: gvr.kind.clone(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// `GroupVersionResource` identifies a Kubernetes resource type
///
/// All objects the harness creates go through the dynamic client, so this is
/// the only type information a handle needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvr {
    /// API group ("" for core)
    pub group: String,
    /// API version (e.g., "v1", "v1beta1")
    pub version: String,
    /// Plural resource name
    pub resource: String,
    /// Kind name
    pub kind: String,
}

impl Gvr {
    #[must_use]
    pub fn new(group: &str, version: &str, resource: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
        }
    }

    /// `apiVersion` as written in manifests
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    #[must_use]
    pub fn deployment() -> Self {
        Self::new("apps", "v1", "deployments", "Deployment")
    }

    #[must_use]
    pub fn service() -> Self {
        Self::new("", "v1", "services", "Service")
    }

    #[must_use]
    pub fn config_map() -> Self {
        Self::new("", "v1", "configmaps", "ConfigMap")
    }

    /// Gateway API: Gateway
    #[must_use]
    pub fn gateway() -> Self {
        Self::new("gateway.networking.k8s.io", "v1beta1", "gateways", "Gateway")
    }

    /// Gateway API: `HTTPRoute`
    #[must_use]
    pub fn http_route() -> Self {
        Self::new(
            "gateway.networking.k8s.io",
            "v1beta1",
            "httproutes",
            "HTTPRoute",
        )
    }

    /// `OpenShift` Route
    #[must_use]
    pub fn openshift_route() -> Self {
        Self::new("route.openshift.io", "v1", "routes", "Route")
    }

    /// Kuadrant operator: Kuadrant
    #[must_use]
    pub fn kuadrant() -> Self {
        Self::new("kuadrant.io", "v1beta1", "kuadrants", "Kuadrant")
    }

    /// Authorino operator: Authorino
    #[must_use]
    pub fn authorino() -> Self {
        Self::new(
            "operator.authorino.kuadrant.io",
            "v1beta1",
            "authorinos",
            "Authorino",
        )
    }

    /// `OpenShift` cluster ingress configuration (cluster scoped)
    #[must_use]
    pub fn ingress_config() -> Self {
        Self::new("config.openshift.io", "v1", "ingresses", "Ingress")
    }

    pub(crate) fn to_api_resource(&self) -> kube::core::ApiResource {
        kube::core::ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }
}

/// Connection to one project of one cluster
///
/// Handles are cheap to clone behind an `Arc`. Switching project never
/// mutates a handle; [`ClusterHandle::change_project`] returns a new one.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Display name of the cluster (kube context or configured alias)
    fn name(&self) -> &str;

    /// Active project (namespace)
    fn project(&self) -> &str;

    /// Whether the cluster answers and the active project exists
    async fn connected(&self) -> bool;

    /// Handle to the same cluster with a different active project
    fn change_project(&self, project: &str) -> Arc<dyn ClusterHandle>;

    /// List objects of a kind in the active project
    async fn list(&self, gvr: &Gvr) -> Result<Vec<Value>, ClusterError>;

    /// Get one object from the active project
    async fn get(&self, gvr: &Gvr, name: &str) -> Result<Value, ClusterError>;

    /// Persist an object in the active project, returning the stored object
    async fn apply(&self, gvr: &Gvr, object: &Value) -> Result<Value, ClusterError>;

    /// Delete an object; a missing object yields [`ClusterError::NotFound`]
    async fn delete(&self, gvr: &Gvr, name: &str) -> Result<(), ClusterError>;

    /// Plural resource names served for an API group
    async fn api_resources(&self, group: &str) -> Result<Vec<String>, ClusterError>;

    /// Wildcard-able apps domain of the cluster (e.g. `apps.example.com`)
    async fn apps_domain(&self) -> Result<String, ClusterError>;
}

/// Read `metadata.name` from an object model
pub(crate) fn object_name(object: &Value) -> Result<&str, ClusterError> {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| ClusterError::InvalidObject("object must have metadata.name".to_string()))
}
