//! Test resources and their lifecycle
//!
//! Every object a test creates goes through two phases: a desired model is
//! built in memory, then [`Scope::commit`] persists it and, in the same call,
//! registers the resource's finalizer. Only the committed model carries
//! cluster-assigned fields.
//!
//! Deletion is idempotent everywhere: a missing object counts as deleted.

use crate::cluster::{object_name, ClusterError, ClusterHandle, Gvr};
use crate::error::HarnessError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

mod authorino;
mod backend;
mod hostname;
mod scope;

pub use authorino::{Authorino, AuthorinoRef};
pub use backend::Backend;
pub use hostname::{ExposedHostname, HostnameClient, HostnameClientError};
pub use scope::{CleanupReport, Scope};

/// Deferred deletion of one committed resource
///
/// Owns everything it needs, so it can outlive the resource handle.
pub type Finalizer = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), HarnessError>> + Send>;

/// Labels attached to every object a test creates
pub type Labels = BTreeMap<String, String>;

/// A resource a test creates and must clean up
#[async_trait]
pub trait TestResource: Send + Sync {
    /// Kind shown in logs and errors
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Handle of the project owning the resource
    fn cluster(&self) -> &Arc<dyn ClusterHandle>;

    /// Whether the last commit succeeded
    fn is_committed(&self) -> bool;

    /// Persist the current desired model
    ///
    /// Committing again pushes local modifications.
    async fn commit(&mut self) -> Result<(), HarnessError>;

    /// Deletion to run when the owning scope closes
    fn finalizer(&self) -> Finalizer;

    /// Delete now; deleting a missing resource succeeds
    async fn delete(&self) -> Result<(), HarnessError>;
}

/// Enough to delete an object, without the object itself
#[derive(Clone)]
pub struct ObjectRef {
    cluster: Arc<dyn ClusterHandle>,
    gvr: Gvr,
    name: String,
}

impl ObjectRef {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterHandle>, gvr: Gvr, name: &str) -> Self {
        Self {
            cluster,
            gvr,
            name: name.to_string(),
        }
    }

    pub async fn delete(&self) -> Result<(), HarnessError> {
        match self.cluster.delete(&self.gvr, &self.name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(kind = %self.gvr.kind, name = %self.name, "Already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Delete several objects in order
///
/// Every object is attempted; the first hard failure is returned at the end.
pub async fn delete_all(refs: &[ObjectRef]) -> Result<(), HarnessError> {
    let mut first_error = None;
    for object in refs {
        if let Err(e) = object.delete().await {
            warn!(kind = %object.gvr.kind, name = %object.name, error = %e, "Delete failed, continuing");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Finalizer deleting `refs` in order
#[must_use]
pub fn deleting(refs: Vec<ObjectRef>) -> Finalizer {
    Box::new(move || Box::pin(async move { delete_all(&refs).await }))
}

/// One Kubernetes object: its kind, owning project and JSON model
///
/// Before commit the model is the desired state; after commit it is the
/// cluster's answer.
#[derive(Clone)]
pub struct ClusterObject {
    cluster: Arc<dyn ClusterHandle>,
    gvr: Gvr,
    name: String,
    model: Value,
    committed: bool,
}

impl ClusterObject {
    /// Desired object; `model` must carry `metadata.name == name`
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterHandle>, gvr: Gvr, name: &str, model: Value) -> Self {
        Self {
            cluster,
            gvr,
            name: name.to_string(),
            model,
            committed: false,
        }
    }

    /// Object read from the cluster, already committed
    pub fn existing(
        cluster: Arc<dyn ClusterHandle>,
        gvr: Gvr,
        model: Value,
    ) -> Result<Self, ClusterError> {
        let name = object_name(&model)?.to_string();
        Ok(Self {
            cluster,
            gvr,
            name,
            model,
            committed: true,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        &self.cluster
    }

    #[must_use]
    pub fn model(&self) -> &Value {
        &self.model
    }

    /// Mutable model; changes reach the cluster on the next commit
    pub fn model_mut(&mut self) -> &mut Value {
        &mut self.model
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Apply the model and keep the stored result
    pub async fn commit(&mut self) -> Result<(), HarnessError> {
        let stored = self
            .cluster
            .apply(&self.gvr, &self.model)
            .await
            .map_err(|e| HarnessError::commit(&self.gvr.kind, &self.name, e))?;
        self.model = stored;
        self.committed = true;
        Ok(())
    }

    /// Re-read the object from the cluster
    pub async fn refresh(&mut self) -> Result<(), ClusterError> {
        self.model = self.cluster.get(&self.gvr, &self.name).await?;
        Ok(())
    }

    #[must_use]
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.cluster.clone(), self.gvr.clone(), &self.name)
    }

    /// Read a string at a JSON pointer, e.g. `/spec/host`
    #[must_use]
    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.model.pointer(pointer).and_then(Value::as_str)
    }
}

/// Serialize a typed object into a model
pub(crate) fn to_model<T: serde::Serialize>(object: &T) -> Result<Value, HarnessError> {
    serde_json::to_value(object)
        .map_err(|e| HarnessError::Cluster(ClusterError::Serialization(e.to_string())))
}

/// Standard metadata block for a new object
pub(crate) fn metadata(name: &str, project: &str, labels: &Labels) -> Value {
    serde_json::json!({
        "name": name,
        "namespace": project,
        "labels": labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use serde_json::json;

    fn config_map(cluster: &MemoryCluster, name: &str) -> ClusterObject {
        ClusterObject::new(
            Arc::new(cluster.clone()),
            Gvr::config_map(),
            name,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": metadata(name, "kuadrant", &Labels::new()),
                "data": {"key": "value"},
            }),
        )
    }

    #[tokio::test]
    async fn test_commit_keeps_cluster_fields() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut object = config_map(&cluster, "cm");

        assert!(!object.is_committed());
        assert!(object.str_at("/metadata/uid").is_none());

        object.commit().await.unwrap();
        assert!(object.is_committed());
        assert!(object.str_at("/metadata/uid").is_some());
        assert!(cluster.contains(&Gvr::config_map(), "cm"));
    }

    #[tokio::test]
    async fn test_commit_failure_is_typed() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        cluster.fail_apply("ConfigMap", "quota exceeded");
        let mut object = config_map(&cluster, "cm");

        let err = object.commit().await.unwrap_err();
        assert!(matches!(err, HarnessError::CommitFailure { ref kind, .. } if kind == "ConfigMap"));
        assert!(!object.is_committed());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut object = config_map(&cluster, "cm");
        object.commit().await.unwrap();

        let target = object.object_ref();
        target.delete().await.unwrap();
        target.delete().await.unwrap();
        assert!(!cluster.contains(&Gvr::config_map(), "cm"));
    }

    #[tokio::test]
    async fn test_delete_surfaces_other_errors() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let target = ObjectRef::new(Arc::new(cluster.clone()), Gvr::config_map(), "cm");
        cluster.set_connected(false);

        assert!(target.delete().await.is_err());
    }

    #[tokio::test]
    async fn test_delete_all_continues_after_failure() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut config = config_map(&cluster, "config");
        config.commit().await.unwrap();
        let service = ObjectRef::new(Arc::new(cluster.clone()), Gvr::service(), "svc");
        cluster.fail_delete("Service", "connection reset");

        let result = delete_all(&[service, config.object_ref()]).await;

        assert!(result.is_err());
        assert!(!cluster.contains(&Gvr::config_map(), "config"));
    }

    #[tokio::test]
    async fn test_deleting_finalizer() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut first = config_map(&cluster, "first");
        let mut second = config_map(&cluster, "second");
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let finalizer = deleting(vec![second.object_ref(), first.object_ref()]);
        finalizer().await.unwrap();

        assert_eq!(
            cluster.deletions(),
            vec![
                ("ConfigMap".to_string(), "second".to_string()),
                ("ConfigMap".to_string(), "first".to_string()),
            ]
        );
    }
}
