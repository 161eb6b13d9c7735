//! Standalone family: Envoy in front of a standalone Authorino
//!
//! The gateway is a ConfigMap holding the Envoy bootstrap, a Deployment
//! mounting it and a Service. Routes are virtual hosts inside that bootstrap;
//! committing or deleting a route rewrites only its own virtual host and
//! restarts Envoy to pick up the change.

use super::{Gateway, GatewayFactory, GatewayRoute, Topology};
use crate::cluster::{ClusterError, ClusterHandle, Gvr};
use crate::error::HarnessError;
use crate::resource::{
    deleting, metadata, AuthorinoRef, Backend, ClusterObject, Finalizer, Labels, ObjectRef,
    TestResource,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Port Envoy serves traffic on
pub const ENVOY_PORT: u16 = 8000;

/// Envoy admin port
pub const ADMIN_PORT: u16 = 8001;

/// Key of the bootstrap in the gateway ConfigMap
const CONFIG_KEY: &str = "envoy.yaml";

/// Directory the ConfigMap is mounted at
const CONFIG_DIR: &str = "/etc/envoy";

/// Upstream cluster of the authorization service
const AUTH_CLUSTER: &str = "external_auth";

/// Pod template annotation bumped to restart Envoy
const REVISION_ANNOTATION: &str = "kuadrant-e2e/config-revision";

const VIRTUAL_HOSTS: &str =
    "/static_resources/listeners/0/filter_chains/0/filters/0/typed_config/route_config/virtual_hosts";
const CLUSTERS: &str = "/static_resources/clusters";

/// Builds [`EnvoyGateway`]s and [`EnvoyVirtualRoute`]s
pub struct EnvoyFactory {
    image: String,
    authorino: AuthorinoRef,
}

impl EnvoyFactory {
    #[must_use]
    pub fn new(image: &str, authorino: AuthorinoRef) -> Self {
        Self {
            image: image.to_string(),
            authorino,
        }
    }
}

impl GatewayFactory for EnvoyFactory {
    fn topology(&self) -> Topology {
        Topology::Standalone
    }

    fn gateway(
        &self,
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        labels: &Labels,
    ) -> Result<Box<dyn Gateway>, HarnessError> {
        Ok(Box::new(EnvoyGateway::new(
            cluster,
            name,
            &self.authorino,
            &self.image,
            labels,
        )?))
    }

    fn route(
        &self,
        gateway: &dyn Gateway,
        name: &str,
        _labels: &Labels,
    ) -> Result<Box<dyn GatewayRoute>, HarnessError> {
        Ok(Box::new(EnvoyVirtualRoute::new(
            gateway.cluster().clone(),
            name,
            gateway.name(),
        )))
    }
}

/// Upstream cluster definition for Envoy
fn upstream_cluster(name: &str, address: &str, port: u16, http2: bool) -> Value {
    let mut cluster = json!({
        "name": name,
        "connect_timeout": "0.25s",
        "type": "STRICT_DNS",
        "lb_policy": "ROUND_ROBIN",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [{
                "lb_endpoints": [{
                    "endpoint": {
                        "address": {"socket_address": {"address": address, "port_value": port}},
                    },
                }],
            }],
        },
    });

    if let (true, Some(fields)) = (http2, cluster.as_object_mut()) {
        fields.insert(
            "typed_extension_protocol_options".to_string(),
            json!({
                "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                    "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                    "explicit_http_config": {"http2_protocol_options": {}},
                },
            }),
        );
    }
    cluster
}

/// Envoy bootstrap with ext_authz wired to Authorino and no virtual hosts
fn bootstrap(authorino: &AuthorinoRef) -> Value {
    json!({
        "static_resources": {
            "listeners": [{
                "name": "main",
                "address": {"socket_address": {"address": "0.0.0.0", "port_value": ENVOY_PORT}},
                "filter_chains": [{
                    "filters": [{
                        "name": "envoy.filters.network.http_connection_manager",
                        "typed_config": {
                            "@type": "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager",
                            "stat_prefix": "local",
                            "use_remote_address": true,
                            "route_config": {"name": "local_route", "virtual_hosts": []},
                            "http_filters": [
                                {
                                    "name": "envoy.filters.http.ext_authz",
                                    "typed_config": {
                                        "@type": "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz",
                                        "transport_api_version": "V3",
                                        "failure_mode_allow": false,
                                        "include_peer_certificate": true,
                                        "grpc_service": {
                                            "envoy_grpc": {"cluster_name": AUTH_CLUSTER},
                                            "timeout": "1s",
                                        },
                                    },
                                },
                                {
                                    "name": "envoy.filters.http.router",
                                    "typed_config": {
                                        "@type": "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
                                    },
                                },
                            ],
                        },
                    }],
                }],
            }],
            "clusters": [upstream_cluster(
                AUTH_CLUSTER,
                &authorino.authorization_address(),
                authorino.authorization_port(),
                true,
            )],
        },
        "admin": {
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": ADMIN_PORT}},
        },
    })
}

fn render(config: &Value) -> Result<String, ClusterError> {
    serde_yaml::to_string(config).map_err(|e| ClusterError::Serialization(e.to_string()))
}

fn parse(config_map: &Value) -> Result<Value, ClusterError> {
    let raw = config_map
        .get("data")
        .and_then(|data| data.get(CONFIG_KEY))
        .and_then(Value::as_str)
        .ok_or_else(|| ClusterError::InvalidObject(format!("ConfigMap has no {CONFIG_KEY}")))?;
    serde_yaml::from_str(raw).map_err(|e| ClusterError::Serialization(e.to_string()))
}

fn entries_mut<'a>(config: &'a mut Value, pointer: &str) -> Result<&'a mut Vec<Value>, ClusterError> {
    config
        .pointer_mut(pointer)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ClusterError::InvalidObject(format!("envoy config has no {pointer}")))
}

/// Insert `entry` or replace the entry with the same name
fn upsert(entries: &mut Vec<Value>, entry: Value) {
    let name = entry.get("name").cloned();
    match entries.iter_mut().find(|e| e.get("name") == name.as_ref()) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

/// Remove the entry named `name`; returns whether one was removed
fn remove(entries: &mut Vec<Value>, name: &str) -> bool {
    let before = entries.len();
    entries.retain(|e| e.get("name").and_then(Value::as_str) != Some(name));
    entries.len() != before
}

/// Upstream clusters a virtual host routes to
fn routed_clusters(virtual_host: &Value) -> Vec<String> {
    let routes = virtual_host.get("routes").and_then(Value::as_array);
    let mut names = Vec::new();

    for route in routes.into_iter().flatten() {
        if let Some(name) = route.pointer("/route/cluster").and_then(Value::as_str) {
            names.push(name.to_string());
        }
        let weighted = route
            .pointer("/route/weighted_clusters/clusters")
            .and_then(Value::as_array);
        for cluster in weighted.into_iter().flatten() {
            if let Some(name) = cluster.get("name").and_then(Value::as_str) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Drop the `candidates` no virtual host routes to anymore
fn prune_upstreams(config: &mut Value, candidates: &[String]) -> Result<(), ClusterError> {
    let in_use: Vec<String> = entries_mut(config, VIRTUAL_HOSTS)?
        .iter()
        .flat_map(routed_clusters)
        .collect();

    let clusters = entries_mut(config, CLUSTERS)?;
    for name in candidates {
        if name != AUTH_CLUSTER && !in_use.contains(name) {
            remove(clusters, name);
        }
    }
    Ok(())
}

/// Clusters routed to by the virtual host named `name`, if it exists
fn previous_upstreams(config: &mut Value, name: &str) -> Result<Vec<String>, ClusterError> {
    Ok(entries_mut(config, VIRTUAL_HOSTS)?
        .iter()
        .find(|vh| vh.get("name").and_then(Value::as_str) == Some(name))
        .map(routed_clusters)
        .unwrap_or_default())
}

/// Envoy gateway: bootstrap ConfigMap, Deployment and Service
pub struct EnvoyGateway {
    name: String,
    cluster: Arc<dyn ClusterHandle>,
    config: ClusterObject,
    deployment: ClusterObject,
    service: ClusterObject,
}

impl EnvoyGateway {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        authorino: &AuthorinoRef,
        image: &str,
        labels: &Labels,
    ) -> Result<Self, HarnessError> {
        let project = cluster.project().to_string();
        let rendered = render(&bootstrap(authorino))?;

        let config = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": metadata(name, &project, labels),
            "data": {CONFIG_KEY: rendered},
        });

        let mut pod_labels = labels.clone();
        pod_labels.insert("deployment".to_string(), name.to_string());

        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": metadata(name, &project, labels),
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"deployment": name}},
                "template": {
                    "metadata": {"labels": pod_labels},
                    "spec": {
                        "containers": [{
                            "name": "envoy",
                            "image": image,
                            "command": ["/usr/local/bin/envoy"],
                            "args": [
                                "--config-path",
                                format!("{CONFIG_DIR}/{CONFIG_KEY}"),
                                "--service-cluster",
                                "front-proxy",
                            ],
                            "ports": [
                                {"name": "web", "containerPort": ENVOY_PORT},
                                {"name": "admin", "containerPort": ADMIN_PORT},
                            ],
                            "volumeMounts": [{"name": "config", "mountPath": CONFIG_DIR, "readOnly": true}],
                        }],
                        "volumes": [{"name": "config", "configMap": {"name": name}}],
                    },
                },
            },
        });

        let service = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": metadata(name, &project, labels),
            "spec": {
                "selector": {"deployment": name},
                "ports": [{"name": "web", "port": ENVOY_PORT, "targetPort": "web"}],
            },
        });

        Ok(Self {
            name: name.to_string(),
            config: ClusterObject::new(cluster.clone(), Gvr::config_map(), name, config),
            deployment: ClusterObject::new(cluster.clone(), Gvr::deployment(), name, deployment),
            service: ClusterObject::new(cluster.clone(), Gvr::service(), name, service),
            cluster,
        })
    }

    /// Current bootstrap as stored in the ConfigMap model
    pub fn config(&self) -> Result<Value, HarnessError> {
        Ok(parse(self.config.model())?)
    }

    fn parts(&self) -> [&ClusterObject; 3] {
        [&self.config, &self.deployment, &self.service]
    }
}

#[async_trait]
impl TestResource for EnvoyGateway {
    fn kind(&self) -> &str {
        "EnvoyGateway"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        &self.cluster
    }

    fn is_committed(&self) -> bool {
        self.parts().iter().all(|part| part.is_committed())
    }

    async fn commit(&mut self) -> Result<(), HarnessError> {
        let was_committed = self.is_committed();
        let mut done: Vec<ObjectRef> = Vec::new();

        for part in [&mut self.config, &mut self.deployment, &mut self.service] {
            if let Err(e) = part.commit().await {
                if !was_committed {
                    for object in done.iter().rev() {
                        if let Err(rollback) = object.delete().await {
                            warn!(name = %self.name, error = %rollback, "Failed to roll back Envoy gateway");
                        }
                    }
                }
                return Err(e);
            }
            done.push(part.object_ref());
        }

        info!(name = %self.name, "Envoy gateway committed");
        Ok(())
    }

    fn finalizer(&self) -> Finalizer {
        deleting(vec![
            self.service.object_ref(),
            self.deployment.object_ref(),
            self.config.object_ref(),
        ])
    }

    async fn delete(&self) -> Result<(), HarnessError> {
        self.finalizer()().await
    }
}

impl Gateway for EnvoyGateway {
    fn reference(&self) -> Value {
        json!({
            "group": "",
            "kind": "Service",
            "name": self.name,
            "namespace": self.cluster.project(),
        })
    }

    fn service_name(&self) -> String {
        self.name.clone()
    }

    fn service_port(&self) -> u16 {
        ENVOY_PORT
    }
}

/// Where a virtual host lives; enough to remove it later
#[derive(Clone)]
struct VirtualHostRef {
    cluster: Arc<dyn ClusterHandle>,
    gateway: String,
    name: String,
}

impl VirtualHostRef {
    /// Read the bootstrap, edit it, write it back and restart Envoy
    async fn edit<F>(&self, edit: F) -> Result<bool, ClusterError>
    where
        F: FnOnce(&mut Value) -> Result<bool, ClusterError>,
    {
        let mut config_map = self.cluster.get(&Gvr::config_map(), &self.gateway).await?;
        let mut config = parse(&config_map)?;

        if !edit(&mut config)? {
            return Ok(false);
        }

        let rendered = render(&config)?;
        if let Some(data) = config_map.get_mut("data").and_then(Value::as_object_mut) {
            data.insert(CONFIG_KEY.to_string(), Value::String(rendered));
        }
        let stored = self.cluster.apply(&Gvr::config_map(), &config_map).await?;

        let revision = stored
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.rollout(&revision).await?;
        Ok(true)
    }

    /// Restart the Envoy deployment by bumping a pod template annotation
    async fn rollout(&self, revision: &str) -> Result<(), ClusterError> {
        let mut deployment = match self.cluster.get(&Gvr::deployment(), &self.gateway).await {
            Ok(deployment) => deployment,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if let Some(template) = deployment
            .pointer_mut("/spec/template/metadata")
            .and_then(Value::as_object_mut)
        {
            let annotations = template
                .entry("annotations")
                .or_insert_with(|| json!({}));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(REVISION_ANNOTATION.to_string(), json!(revision));
            }
        }

        self.cluster.apply(&Gvr::deployment(), &deployment).await?;
        debug!(gateway = %self.gateway, revision, "Restarted Envoy");
        Ok(())
    }

    async fn remove(&self) -> Result<(), HarnessError> {
        let name = self.name.clone();
        let result = self
            .edit(move |config| {
                let upstreams = previous_upstreams(config, &name)?;
                if !remove(entries_mut(config, VIRTUAL_HOSTS)?, &name) {
                    return Ok(false);
                }
                prune_upstreams(config, &upstreams)?;
                Ok(true)
            })
            .await;

        match result {
            Ok(removed) => {
                debug!(route = %self.name, removed, "Removed virtual host");
                Ok(())
            }
            // Gateway already gone, nothing left to edit
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Upstream backend of a virtual route
#[derive(Debug, Clone, PartialEq, Eq)]
struct Upstream {
    name: String,
    address: String,
    port: u16,
}

/// Virtual host in an Envoy gateway's bootstrap
pub struct EnvoyVirtualRoute {
    target: VirtualHostRef,
    hostnames: Vec<String>,
    backends: Vec<Upstream>,
    committed: bool,
}

impl EnvoyVirtualRoute {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterHandle>, name: &str, gateway: &str) -> Self {
        Self {
            target: VirtualHostRef {
                cluster,
                gateway: gateway.to_string(),
                name: name.to_string(),
            },
            hostnames: Vec::new(),
            backends: Vec::new(),
            committed: false,
        }
    }

    /// Virtual host entry for the current hostnames and backends
    #[must_use]
    pub fn virtual_host(&self) -> Value {
        let action = match self.backends.as_slice() {
            [] => json!({"direct_response": {"status": 503}}),
            [single] => json!({"route": {"cluster": single.name}}),
            many => {
                let clusters: Vec<Value> = many
                    .iter()
                    .map(|b| json!({"name": b.name, "weight": 1}))
                    .collect();
                json!({"route": {"weighted_clusters": {"clusters": clusters}}})
            }
        };

        let mut route = json!({"match": {"prefix": "/"}});
        if let (Some(route), Some(action)) = (route.as_object_mut(), action.as_object()) {
            route.extend(action.clone());
        }

        json!({
            "name": self.target.name,
            "domains": self.hostnames,
            "routes": [route],
        })
    }
}

#[async_trait]
impl TestResource for EnvoyVirtualRoute {
    fn kind(&self) -> &str {
        "EnvoyVirtualRoute"
    }

    fn name(&self) -> &str {
        &self.target.name
    }

    fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        &self.target.cluster
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    async fn commit(&mut self) -> Result<(), HarnessError> {
        let virtual_host = self.virtual_host();
        let upstreams: Vec<Value> = self
            .backends
            .iter()
            .map(|b| upstream_cluster(&b.name, &b.address, b.port, false))
            .collect();

        let name = self.target.name.clone();

        self.target
            .edit(move |config| {
                let replaced = previous_upstreams(config, &name)?;
                upsert(entries_mut(config, VIRTUAL_HOSTS)?, virtual_host);
                let clusters = entries_mut(config, CLUSTERS)?;
                for upstream in upstreams {
                    upsert(clusters, upstream);
                }
                prune_upstreams(config, &replaced)?;
                Ok(true)
            })
            .await
            .map_err(|e| HarnessError::commit("EnvoyVirtualRoute", &self.target.name, e))?;

        self.committed = true;
        Ok(())
    }

    fn finalizer(&self) -> Finalizer {
        let target = self.target.clone();
        Box::new(move || Box::pin(async move { target.remove().await }))
    }

    async fn delete(&self) -> Result<(), HarnessError> {
        self.target.remove().await
    }
}

impl GatewayRoute for EnvoyVirtualRoute {
    fn add_hostname(&mut self, hostname: &str) {
        if !self.hostnames.iter().any(|h| h == hostname) {
            self.hostnames.push(hostname.to_string());
        }
    }

    fn remove_hostname(&mut self, hostname: &str) {
        self.hostnames.retain(|h| h != hostname);
    }

    fn remove_all_hostnames(&mut self) {
        self.hostnames.clear();
    }

    fn add_backend(&mut self, backend: &Backend) {
        let upstream = Upstream {
            name: backend.name().to_string(),
            address: backend.address(),
            port: backend.port(),
        };
        if !self.backends.contains(&upstream) {
            self.backends.push(upstream);
        }
    }

    fn hostnames(&self) -> Vec<String> {
        self.hostnames.clone()
    }
}
