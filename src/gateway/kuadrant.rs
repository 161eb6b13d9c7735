//! Gateway API family reconciled by the Kuadrant control plane

use super::{Gateway, GatewayFactory, GatewayRoute, Topology};
use crate::cluster::{ClusterHandle, Gvr};
use crate::error::HarnessError;
use crate::resource::{deleting, metadata, Backend, ClusterObject, Finalizer, Labels, TestResource};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Gateway class served by the Istio-based Kuadrant data plane
pub const GATEWAY_CLASS: &str = "istio";

/// HTTP listener port of the gateway
pub const LISTENER_PORT: u16 = 80;

/// Builds [`KuadrantGateway`]s and [`HttpRoute`]s
pub struct KuadrantFactory {
    wildcard_domain: String,
}

impl KuadrantFactory {
    #[must_use]
    pub fn new(wildcard_domain: &str) -> Self {
        Self {
            wildcard_domain: wildcard_domain.to_string(),
        }
    }
}

impl GatewayFactory for KuadrantFactory {
    fn topology(&self) -> Topology {
        Topology::Kuadrant
    }

    fn gateway(
        &self,
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        labels: &Labels,
    ) -> Result<Box<dyn Gateway>, HarnessError> {
        Ok(Box::new(KuadrantGateway::new(
            cluster,
            name,
            &self.wildcard_domain,
            labels,
        )))
    }

    fn route(
        &self,
        gateway: &dyn Gateway,
        name: &str,
        labels: &Labels,
    ) -> Result<Box<dyn GatewayRoute>, HarnessError> {
        Ok(Box::new(HttpRoute::new(
            gateway.cluster().clone(),
            name,
            gateway.reference(),
            labels,
        )))
    }
}

/// Gateway API `Gateway` with one HTTP listener for a wildcard hostname
pub struct KuadrantGateway {
    object: ClusterObject,
}

impl KuadrantGateway {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        wildcard_domain: &str,
        labels: &Labels,
    ) -> Self {
        let gvr = Gvr::gateway();
        let model = json!({
            "apiVersion": gvr.api_version(),
            "kind": &gvr.kind,
            "metadata": metadata(name, cluster.project(), labels),
            "spec": {
                "gatewayClassName": GATEWAY_CLASS,
                "listeners": [{
                    "name": "api",
                    "port": LISTENER_PORT,
                    "protocol": "HTTP",
                    "hostname": wildcard_domain,
                    "allowedRoutes": {"namespaces": {"from": "All"}},
                }],
            },
        });

        Self {
            object: ClusterObject::new(cluster, gvr, name, model),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Value {
        self.object.model()
    }
}

#[async_trait]
impl TestResource for KuadrantGateway {
    fn kind(&self) -> &str {
        "Gateway"
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

impl Gateway for KuadrantGateway {
    fn reference(&self) -> Value {
        json!({
            "group": GATEWAY_API_GROUP,
            "kind": "Gateway",
            "name": self.object.name(),
            "namespace": self.object.cluster().project(),
        })
    }

    /// Istio names the deployed gateway Service after the Gateway
    fn service_name(&self) -> String {
        format!("{}-istio", self.object.name())
    }

    fn service_port(&self) -> u16 {
        LISTENER_PORT
    }
}

/// Gateway API `HTTPRoute` with a single rule
pub struct HttpRoute {
    object: ClusterObject,
}

impl HttpRoute {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterHandle>, name: &str, parent: Value, labels: &Labels) -> Self {
        let gvr = Gvr::http_route();
        let model = json!({
            "apiVersion": gvr.api_version(),
            "kind": &gvr.kind,
            "metadata": metadata(name, cluster.project(), labels),
            "spec": {
                "parentRefs": [parent],
                "hostnames": [],
                "rules": [{"backendRefs": []}],
            },
        });

        Self {
            object: ClusterObject::new(cluster, gvr, name, model),
        }
    }

    #[must_use]
    pub fn reference(&self) -> Value {
        json!({
            "group": GATEWAY_API_GROUP,
            "kind": "HTTPRoute",
            "name": self.object.name(),
            "namespace": self.object.cluster().project(),
        })
    }

    /// Restrict the rule to a path prefix and/or exact header values
    pub fn set_match(&mut self, path_prefix: Option<&str>, headers: &[(&str, &str)]) {
        let mut matcher = serde_json::Map::new();
        if let Some(prefix) = path_prefix {
            matcher.insert(
                "path".to_string(),
                json!({"type": "PathPrefix", "value": prefix}),
            );
        }
        if !headers.is_empty() {
            let headers: Vec<Value> = headers
                .iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect();
            matcher.insert("headers".to_string(), Value::Array(headers));
        }

        if let Some(rule) = self
            .object
            .model_mut()
            .pointer_mut("/spec/rules/0")
            .and_then(Value::as_object_mut)
        {
            rule.insert("matches".to_string(), json!([matcher]));
        }
    }

    #[must_use]
    pub fn model(&self) -> &Value {
        self.object.model()
    }

    fn array_mut(&mut self, pointer: &str) -> Option<&mut Vec<Value>> {
        self.object
            .model_mut()
            .pointer_mut(pointer)
            .and_then(Value::as_array_mut)
    }
}

#[async_trait]
impl TestResource for HttpRoute {
    fn kind(&self) -> &str {
        "HTTPRoute"
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

impl GatewayRoute for HttpRoute {
    fn add_hostname(&mut self, hostname: &str) {
        if let Some(hostnames) = self.array_mut("/spec/hostnames") {
            let hostname = json!(hostname);
            if !hostnames.contains(&hostname) {
                hostnames.push(hostname);
            }
        }
    }

    fn remove_hostname(&mut self, hostname: &str) {
        if let Some(hostnames) = self.array_mut("/spec/hostnames") {
            hostnames.retain(|h| h.as_str() != Some(hostname));
        }
    }

    fn remove_all_hostnames(&mut self) {
        if let Some(hostnames) = self.array_mut("/spec/hostnames") {
            hostnames.clear();
        }
    }

    fn add_backend(&mut self, backend: &Backend) {
        if let Some(refs) = self.array_mut("/spec/rules/0/backendRefs") {
            let reference = backend.reference();
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
    }

    fn hostnames(&self) -> Vec<String> {
        self.object
            .model()
            .pointer("/spec/hostnames")
            .and_then(Value::as_array)
            .map(|hostnames| {
                hostnames
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
