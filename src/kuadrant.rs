//! The Kuadrant custom resource of an integrated deployment

use crate::cluster::{ClusterHandle, Gvr};
use crate::error::HarnessError;
use crate::resource::ClusterObject;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Shown when Kuadrant tests run but no Kuadrant resource exists
pub const KUADRANT_NOT_FOUND: &str = "Running Kuadrant tests, but Kuadrant resource was not found";

/// Deployment the Kuadrant operator creates for Limitador
pub const LIMITADOR_DEPLOYMENT: &str = "limitador-limitador";

/// Existing Kuadrant resource in the system project
///
/// Fetched, never created: the harness only tunes the deployed one.
pub struct KuadrantCr {
    object: ClusterObject,
}

impl KuadrantCr {
    /// First Kuadrant resource in the project of `system`
    #[instrument(skip(system), fields(project = %system.project()))]
    pub async fn fetch(system: Arc<dyn ClusterHandle>) -> Result<Self, HarnessError> {
        let mut items = system.list(&Gvr::kuadrant()).await?;
        if items.is_empty() {
            return Err(HarnessError::ResourceNotFound(KUADRANT_NOT_FOUND.to_string()));
        }

        let model = items.swap_remove(0);
        let object = ClusterObject::existing(system, Gvr::kuadrant(), model)?;
        debug!(name = %object.name(), "Found Kuadrant resource");
        Ok(Self { object })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.object.name()
    }

    /// `spec.limitador`, empty when unset
    #[must_use]
    pub fn limitador(&self) -> Value {
        self.object
            .model()
            .pointer("/spec/limitador")
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// Replace `spec.limitador`; reaches the cluster on [`KuadrantCr::commit`]
    pub fn set_limitador(&mut self, limitador: Value) {
        let model = self.object.model_mut();
        if let Some(fields) = model.as_object_mut() {
            let spec = fields.entry("spec").or_insert_with(|| json!({}));
            if let Some(spec) = spec.as_object_mut() {
                spec.insert("limitador".to_string(), limitador);
            }
        }
    }

    pub async fn commit(&mut self) -> Result<(), HarnessError> {
        self.object.commit().await
    }

    /// Limitador Deployment managed by this Kuadrant
    pub async fn limitador_deployment(&self) -> Result<Value, HarnessError> {
        Ok(self
            .object
            .cluster()
            .get(&Gvr::deployment(), LIMITADOR_DEPLOYMENT)
            .await?)
    }

    #[must_use]
    pub fn model(&self) -> &Value {
        self.object.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;

    fn system_with_kuadrant() -> MemoryCluster {
        let system = MemoryCluster::new("primary", "kuadrant-system");
        system.insert(
            &Gvr::kuadrant(),
            json!({
                "apiVersion": "kuadrant.io/v1beta1",
                "kind": "Kuadrant",
                "metadata": {"name": "kuadrant", "namespace": "kuadrant-system"},
                "spec": {},
            }),
        );
        system
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let system = MemoryCluster::new("primary", "kuadrant-system");
        let err = KuadrantCr::fetch(Arc::new(system)).await.err().unwrap();
        assert!(matches!(err, HarnessError::ResourceNotFound(ref m) if m == KUADRANT_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_fetch_from_other_view_fails() {
        let system = system_with_kuadrant();
        let primary = system.view("kuadrant");
        assert!(KuadrantCr::fetch(Arc::new(primary)).await.is_err());
    }

    #[tokio::test]
    async fn test_limitador_roundtrip() {
        let system = system_with_kuadrant();
        let mut kuadrant = KuadrantCr::fetch(Arc::new(system.clone())).await.unwrap();

        assert_eq!(kuadrant.name(), "kuadrant");
        assert_eq!(kuadrant.limitador(), json!({}));

        kuadrant.set_limitador(json!({"replicas": 2}));
        kuadrant.commit().await.unwrap();

        let stored = system.object(&Gvr::kuadrant(), "kuadrant").unwrap();
        assert_eq!(stored.pointer("/spec/limitador/replicas"), Some(&json!(2)));
        assert_eq!(kuadrant.limitador(), json!({"replicas": 2}));
    }

    #[tokio::test]
    async fn test_limitador_deployment_missing() {
        let system = system_with_kuadrant();
        let kuadrant = KuadrantCr::fetch(Arc::new(system)).await.unwrap();
        let err = kuadrant.limitador_deployment().await.unwrap_err();
        assert!(matches!(err, HarnessError::Cluster(ref e) if e.is_not_found()));
    }
}
