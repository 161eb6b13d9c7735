use super::{object_name, ClusterError, ClusterHandle, Gvr};
use crate::config::ClusterTarget;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Client, Config};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "kuadrant-e2e";

/// Handle to a real cluster backed by a kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    name: String,
    project: String,
    client: Client,
}

impl KubeCluster {
    /// Build a client for the target's kubeconfig and context
    ///
    /// Building the client does not contact the API server; use
    /// [`ClusterHandle::connected`] for that.
    pub async fn connect(target: &ClusterTarget) -> Result<Self, ClusterError> {
        let options = KubeConfigOptions {
            context: target.context.clone(),
            ..Default::default()
        };

        let config = match (&target.kubeconfig, &target.context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Unavailable(format!("{}: {e}", target.name)))?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ClusterError::Unavailable(format!("{}: {e}", target.name)))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ClusterError::Unavailable(format!("{}: {e}", target.name)))?,
            (None, None) => Config::infer()
                .await
                .map_err(|e| ClusterError::Unavailable(format!("{}: {e}", target.name)))?,
        };

        let client = Client::try_from(config)
            .map_err(|e| ClusterError::Unavailable(format!("{}: {e}", target.name)))?;

        debug!(cluster = %target.name, project = %target.project, "Built cluster client");

        Ok(Self::from_client(&target.name, &target.project, client))
    }

    /// Wrap an existing client
    #[must_use]
    pub fn from_client(name: &str, project: &str, client: Client) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            client,
        }
    }

    fn api(&self, gvr: &Gvr) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.project, &gvr.to_api_resource())
    }
}

/// Turn a kube error into a [`ClusterError`] with human-readable context
fn map_kube_error(err: kube::Error, gvr: &Gvr, name: &str) -> ClusterError {
    if let kube::Error::Api(ref response) = err {
        if response.code == 404 {
            return ClusterError::not_found(gvr, name);
        }
    }

    let raw = err.to_string();
    let kind = &gvr.kind;

    if raw.contains("AlreadyExists") || raw.contains("409") {
        return ClusterError::Api(format!("{kind} '{name}' already exists"));
    }

    if raw.contains("Forbidden") || raw.contains("403") {
        return ClusterError::Api(format!("{kind} '{name}': permission denied (check RBAC)"));
    }

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return ClusterError::Unavailable(format!("{kind} '{name}': cannot connect to Kubernetes API"));
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return ClusterError::Api(format!("{kind} '{name}': operation timed out"));
    }

    ClusterError::Api(format!("{kind} '{name}': {raw}"))
}

fn to_value(obj: &DynamicObject) -> Result<Value, ClusterError> {
    serde_json::to_value(obj).map_err(|e| ClusterError::Serialization(e.to_string()))
}

#[async_trait]
impl ClusterHandle for KubeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn connected(&self) -> bool {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get(&self.project).await {
            Ok(_) => true,
            Err(e) => {
                debug!(cluster = %self.name, project = %self.project, error = %e, "Cluster not connected");
                false
            }
        }
    }

    fn change_project(&self, project: &str) -> Arc<dyn ClusterHandle> {
        Arc::new(Self {
            name: self.name.clone(),
            project: project.to_string(),
            client: self.client.clone(),
        })
    }

    #[instrument(skip(self), fields(cluster = %self.name, project = %self.project, kind = %gvr.kind))]
    async fn list(&self, gvr: &Gvr) -> Result<Vec<Value>, ClusterError> {
        let list = self
            .api(gvr)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, gvr, "*"))?;

        list.items.iter().map(to_value).collect()
    }

    async fn get(&self, gvr: &Gvr, name: &str) -> Result<Value, ClusterError> {
        let obj = self
            .api(gvr)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, gvr, name))?;
        to_value(&obj)
    }

    #[instrument(skip(self, object), fields(cluster = %self.name, project = %self.project, kind = %gvr.kind))]
    async fn apply(&self, gvr: &Gvr, object: &Value) -> Result<Value, ClusterError> {
        let mut dyn_obj: DynamicObject = serde_json::from_value(object.clone())
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
        dyn_obj.metadata.namespace = Some(self.project.clone());
        // Objects read back from the cluster carry these; apply rejects them
        dyn_obj.metadata.managed_fields = None;
        let name = object_name(object)?.to_string();

        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = self
            .api(gvr)
            .patch(&name, &params, &Patch::Apply(&dyn_obj))
            .await
            .map_err(|e| map_kube_error(e, gvr, &name))?;

        info!(name = %name, "Applied resource");

        to_value(&applied)
    }

    #[instrument(skip(self), fields(cluster = %self.name, project = %self.project, kind = %gvr.kind))]
    async fn delete(&self, gvr: &Gvr, name: &str) -> Result<(), ClusterError> {
        self.api(gvr)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, gvr, name))?;

        info!(name = %name, "Deleted resource");
        Ok(())
    }

    async fn api_resources(&self, group: &str) -> Result<Vec<String>, ClusterError> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await
            .map_err(|e| ClusterError::Api(format!("API discovery failed: {e}")))?;

        let mut plurals = Vec::new();
        for api_group in discovery.groups() {
            for (ar, _caps) in api_group.recommended_resources() {
                plurals.push(ar.plural);
            }
        }
        Ok(plurals)
    }

    async fn apps_domain(&self) -> Result<String, ClusterError> {
        let gvr = Gvr::ingress_config();
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &gvr.to_api_resource());
        let ingress = api
            .get("cluster")
            .await
            .map_err(|e| map_kube_error(e, &gvr, "cluster"))?;

        ingress
            .data
            .pointer("/spec/domain")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| ClusterError::InvalidObject("ingress config has no spec.domain".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires kubeconfig
    async fn test_connect_default_context() {
        let target = ClusterTarget::new("default", "default");
        let cluster = KubeCluster::connect(&target)
            .await
            .expect("requires kubeconfig");
        assert!(cluster.connected().await);
    }

    #[tokio::test]
    #[ignore] // Requires kubeconfig
    async fn test_change_project_keeps_cluster() {
        let target = ClusterTarget::new("default", "default");
        let cluster = KubeCluster::connect(&target)
            .await
            .expect("requires kubeconfig");
        let system = cluster.change_project("kube-system");
        assert_eq!(system.name(), "default");
        assert_eq!(system.project(), "kube-system");
        assert_eq!(cluster.project(), "default");
    }
}
