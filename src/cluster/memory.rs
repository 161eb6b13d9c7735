use super::{object_name, ClusterError, ClusterHandle, Gvr};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call made against a [`MemoryCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    List { project: String, kind: String },
    Get { project: String, kind: String, name: String },
    Apply { project: String, kind: String, name: String },
    Delete { project: String, kind: String, name: String },
    ApiResources { group: String },
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    connected: bool,
    objects: BTreeMap<ObjectKey, Value>,
    api_resources: BTreeMap<String, Vec<String>>,
    apps_domain: Option<String>,
    apply_failures: BTreeMap<String, String>,
    list_failures: BTreeMap<String, String>,
    delete_failures: BTreeMap<String, String>,
    calls: Vec<ClusterCall>,
    revision: u64,
}

/// In-memory cluster for tests and dry runs
///
/// Every handle produced by [`ClusterHandle::change_project`] shares the same
/// object store, so a Kuadrant resource inserted into `kuadrant-system` is
/// visible to any view of that project. Applying an `OpenShift` Route without
/// `spec.host` assigns one under the apps domain, like the router does.
///
/// This type is cheaply cloneable - cloning only increments a reference count.
#[derive(Clone)]
pub struct MemoryCluster {
    name: String,
    project: String,
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    /// Create a connected, empty cluster
    #[must_use]
    pub fn new(name: &str, project: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            state: Arc::new(Mutex::new(State {
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// Same store, different active project
    #[must_use]
    pub fn view(&self, project: &str) -> Self {
        Self {
            name: self.name.clone(),
            project: project.to_string(),
            state: self.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self, gvr: &Gvr, name: &str) -> ObjectKey {
        (self.project.clone(), gvr.resource.clone(), name.to_string())
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    #[must_use]
    pub fn with_apps_domain(self, domain: &str) -> Self {
        self.state().apps_domain = Some(domain.to_string());
        self
    }

    /// Store an object in the active project without recording a call
    pub fn insert(&self, gvr: &Gvr, object: Value) {
        let name = object_name(&object).unwrap_or_default().to_string();
        let key = self.key(gvr, &name);
        self.state().objects.insert(key, object);
    }

    /// Serve a plural resource name for an API group
    pub fn serve_api_resource(&self, group: &str, plural: &str) {
        self.state()
            .api_resources
            .entry(group.to_string())
            .or_default()
            .push(plural.to_string());
    }

    /// Make every apply of `kind` fail with `message`
    pub fn fail_apply(&self, kind: &str, message: &str) {
        self.state()
            .apply_failures
            .insert(kind.to_string(), message.to_string());
    }

    /// Make every list of `kind` fail with `message`
    pub fn fail_list(&self, kind: &str, message: &str) {
        self.state()
            .list_failures
            .insert(kind.to_string(), message.to_string());
    }

    /// Make every delete of `kind` fail with `message`
    pub fn fail_delete(&self, kind: &str, message: &str) {
        self.state()
            .delete_failures
            .insert(kind.to_string(), message.to_string());
    }

    /// Whether the active project holds the object
    #[must_use]
    pub fn contains(&self, gvr: &Gvr, name: &str) -> bool {
        let key = self.key(gvr, name);
        self.state().objects.contains_key(&key)
    }

    /// Stored object from the active project
    #[must_use]
    pub fn object(&self, gvr: &Gvr, name: &str) -> Option<Value> {
        let key = self.key(gvr, name);
        self.state().objects.get(&key).cloned()
    }

    /// Number of objects across all projects
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Every call recorded so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    /// `(kind, name)` of every delete call, in order
    #[must_use]
    pub fn deletions(&self) -> Vec<(String, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::Delete { kind, name, .. } => Some((kind.clone(), name.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClusterCall) -> Result<MutexGuard<'_, State>, ClusterError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.connected {
            Ok(state)
        } else {
            Err(ClusterError::Unavailable(self.name.clone()))
        }
    }
}

#[async_trait]
impl ClusterHandle for MemoryCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn connected(&self) -> bool {
        self.state().connected
    }

    fn change_project(&self, project: &str) -> Arc<dyn ClusterHandle> {
        Arc::new(self.view(project))
    }

    async fn list(&self, gvr: &Gvr) -> Result<Vec<Value>, ClusterError> {
        let state = self.record(ClusterCall::List {
            project: self.project.clone(),
            kind: gvr.kind.clone(),
        })?;

        if let Some(message) = state.list_failures.get(&gvr.kind) {
            return Err(ClusterError::Api(message.clone()));
        }

        Ok(state
            .objects
            .iter()
            .filter(|((project, resource, _), _)| {
                *project == self.project && *resource == gvr.resource
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn get(&self, gvr: &Gvr, name: &str) -> Result<Value, ClusterError> {
        let key = self.key(gvr, name);
        let state = self.record(ClusterCall::Get {
            project: self.project.clone(),
            kind: gvr.kind.clone(),
            name: name.to_string(),
        })?;

        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(gvr, name))
    }

    async fn apply(&self, gvr: &Gvr, object: &Value) -> Result<Value, ClusterError> {
        let name = object_name(object)?.to_string();
        let key = self.key(gvr, &name);
        let mut state = self.record(ClusterCall::Apply {
            project: self.project.clone(),
            kind: gvr.kind.clone(),
            name: name.clone(),
        })?;

        if let Some(message) = state.apply_failures.get(&gvr.kind) {
            return Err(ClusterError::Api(message.clone()));
        }

        state.revision += 1;
        let revision = state.revision.to_string();
        let uid = state
            .objects
            .get(&key)
            .and_then(|existing| existing.pointer("/metadata/uid").cloned())
            .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));

        let mut stored = object.clone();
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("namespace".to_string(), json!(self.project));
            metadata.insert("uid".to_string(), uid);
            metadata.insert("resourceVersion".to_string(), json!(revision));
        }

        if *gvr == Gvr::openshift_route() && stored.pointer("/spec/host").is_none() {
            let domain = state
                .apps_domain
                .clone()
                .unwrap_or_else(|| "apps.example.com".to_string());
            if let Some(spec) = stored.get_mut("spec").and_then(Value::as_object_mut) {
                spec.insert(
                    "host".to_string(),
                    json!(format!("{name}-{}.{domain}", self.project)),
                );
            }
        }

        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, gvr: &Gvr, name: &str) -> Result<(), ClusterError> {
        let key = self.key(gvr, name);
        let mut state = self.record(ClusterCall::Delete {
            project: self.project.clone(),
            kind: gvr.kind.clone(),
            name: name.to_string(),
        })?;

        if let Some(message) = state.delete_failures.get(&gvr.kind) {
            return Err(ClusterError::Api(message.clone()));
        }

        match state.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(ClusterError::not_found(gvr, name)),
        }
    }

    async fn api_resources(&self, group: &str) -> Result<Vec<String>, ClusterError> {
        let state = self.record(ClusterCall::ApiResources {
            group: group.to_string(),
        })?;
        Ok(state.api_resources.get(group).cloned().unwrap_or_default())
    }

    async fn apps_domain(&self) -> Result<String, ClusterError> {
        let state = self.state();
        if !state.connected {
            return Err(ClusterError::Unavailable(self.name.clone()));
        }
        state
            .apps_domain
            .clone()
            .ok_or_else(|| ClusterError::not_found(&Gvr::ingress_config(), "cluster"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_assigns_cluster_fields() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        let applied = cluster
            .apply(
                &Gvr::config_map(),
                &json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}}),
            )
            .await
            .unwrap();

        assert_eq!(applied["metadata"]["namespace"], "kuadrant");
        assert!(applied["metadata"]["uid"].is_string());
        assert_eq!(applied["metadata"]["resourceVersion"], "1");
    }

    #[tokio::test]
    async fn test_reapply_keeps_uid() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        let obj = json!({"metadata": {"name": "cm"}});
        let first = cluster.apply(&Gvr::config_map(), &obj).await.unwrap();
        let second = cluster.apply(&Gvr::config_map(), &obj).await.unwrap();

        assert_eq!(first["metadata"]["uid"], second["metadata"]["uid"]);
        assert_ne!(
            first["metadata"]["resourceVersion"],
            second["metadata"]["resourceVersion"]
        );
    }

    #[tokio::test]
    async fn test_route_gets_host() {
        let cluster = MemoryCluster::new("local", "kuadrant").with_apps_domain("apps.test.net");
        let applied = cluster
            .apply(
                &Gvr::openshift_route(),
                &json!({"metadata": {"name": "hostname"}, "spec": {"to": {"name": "gw"}}}),
            )
            .await
            .unwrap();

        assert_eq!(applied["spec"]["host"], "hostname-kuadrant.apps.test.net");
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        cluster.view("kuadrant-system").insert(
            &Gvr::kuadrant(),
            json!({"metadata": {"name": "kuadrant-sample"}}),
        );

        assert!(cluster.list(&Gvr::kuadrant()).await.unwrap().is_empty());
        let system = cluster.change_project("kuadrant-system");
        assert_eq!(system.list(&Gvr::kuadrant()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        let err = cluster.delete(&Gvr::gateway(), "gw").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cluster.deletions(), vec![("Gateway".to_string(), "gw".to_string())]);
    }

    #[tokio::test]
    async fn test_disconnected_rejects_calls() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        cluster.set_connected(false);

        assert!(!cluster.connected().await);
        let err = cluster.list(&Gvr::kuadrant()).await.unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let cluster = MemoryCluster::new("local", "kuadrant");
        cluster.fail_apply("HTTPRoute", "webhook denied");
        cluster.fail_list("Kuadrant", "forbidden");

        let err = cluster
            .apply(&Gvr::http_route(), &json!({"metadata": {"name": "r"}}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "webhook denied");
        assert!(!cluster.contains(&Gvr::http_route(), "r"));

        let err = cluster.list(&Gvr::kuadrant()).await.unwrap_err();
        assert_eq!(err.to_string(), "forbidden");
    }
}
