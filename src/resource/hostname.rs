//! Publicly reachable hostnames for gateways
//!
//! A hostname is an `OpenShift` Route in front of the gateway Service. The
//! router assigns `spec.host`, so the hostname is known only after commit.

use super::{deleting, metadata, ClusterObject, Finalizer, Labels, TestResource};
use crate::cluster::{ClusterHandle, Gvr};
use crate::error::HarnessError;
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts before a 503 is returned to the caller
const DEFAULT_ATTEMPTS: usize = 8;

/// Errors from [`HostnameClient`]
#[derive(Debug, thiserror::Error)]
pub enum HostnameClientError {
    #[error("hostname '{0}' is not exposed yet")]
    NotExposed(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Route exposing a gateway Service outside the cluster
pub struct ExposedHostname {
    object: ClusterObject,
}

impl ExposedHostname {
    /// Desired Route to `service:port`
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        service: &str,
        port: u16,
        labels: &Labels,
    ) -> Self {
        let gvr = Gvr::openshift_route();
        let model = json!({
            "apiVersion": gvr.api_version(),
            "kind": &gvr.kind,
            "metadata": metadata(name, cluster.project(), labels),
            "spec": {
                "to": {"kind": "Service", "name": service},
                "port": {"targetPort": port},
            },
        });

        Self {
            object: ClusterObject::new(cluster, gvr, name, model),
        }
    }

    /// Hostname assigned by the router, `None` before commit
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.object.str_at("/spec/host")
    }

    /// HTTP client for this hostname that waits out route propagation
    pub fn client(&self) -> Result<HostnameClient, HostnameClientError> {
        let host = self
            .hostname()
            .ok_or_else(|| HostnameClientError::NotExposed(self.object.name().to_string()))?;
        HostnameClient::new(&format!("http://{host}"))
    }
}

#[async_trait]
impl TestResource for ExposedHostname {
    fn kind(&self) -> &str {
        "Route"
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

/// HTTP client bound to one base URL
///
/// Freshly exposed routes answer 503 until the router and gateway pick them
/// up, so 503 responses are retried with exponential backoff (100ms doubling
/// up to 5s). Any other status is returned as is.
#[derive(Clone)]
pub struct HostnameClient {
    base_url: String,
    http: reqwest::Client,
    attempts: usize,
}

impl HostnameClient {
    pub fn new(base_url: &str) -> Result<Self, HostnameClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            attempts: DEFAULT_ATTEMPTS,
        })
    }

    /// Number of attempts for 503 responses (at least 1)
    #[must_use]
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Send a request, retrying 503 responses
    pub async fn request(&self, method: Method, path: &str) -> Result<Response, HostnameClientError> {
        let url = self.url(path);
        let mut backoff = Duration::from_millis(100);
        let max_backoff = Duration::from_secs(5);

        for attempt in 1..self.attempts {
            let response = self.http.request(method.clone(), &url).send().await?;
            if response.status() != StatusCode::SERVICE_UNAVAILABLE {
                return Ok(response);
            }
            debug!(url = %url, attempt, backoff = ?backoff, "Service unavailable, backing off");
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, max_backoff);
        }

        let response = self.http.request(method, &url).send().await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            warn!(url = %url, attempts = self.attempts, "Still unavailable after retries");
        }
        Ok(response)
    }

    pub async fn get(&self, path: &str) -> Result<Response, HostnameClientError> {
        self.request(Method::GET, path).await
    }

    /// Send `count` GET requests one after another
    pub async fn get_many(
        &self,
        path: &str,
        count: usize,
    ) -> Result<Vec<Response>, HostnameClientError> {
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            responses.push(self.get(path).await?);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;

    #[tokio::test]
    async fn test_hostname_assigned_on_commit() {
        let cluster = MemoryCluster::new("primary", "kuadrant").with_apps_domain("apps.lab.test");
        let mut hostname = ExposedHostname::new(
            Arc::new(cluster.clone()),
            "hostname-alice-foo-abc",
            "gw-alice-foo-abc-istio",
            80,
            &Labels::new(),
        );

        assert!(hostname.hostname().is_none());
        assert!(matches!(
            hostname.client(),
            Err(HostnameClientError::NotExposed(_))
        ));

        hostname.commit().await.unwrap();
        assert_eq!(
            hostname.hostname(),
            Some("hostname-alice-foo-abc-kuadrant.apps.lab.test")
        );

        let stored = cluster
            .object(&Gvr::openshift_route(), "hostname-alice-foo-abc")
            .unwrap();
        assert_eq!(
            stored.pointer("/spec/to/name"),
            Some(&json!("gw-alice-foo-abc-istio"))
        );

        let client = hostname.client().unwrap();
        assert_eq!(
            client.base_url(),
            "http://hostname-alice-foo-abc-kuadrant.apps.lab.test"
        );
    }

    #[test]
    fn test_client_urls() {
        let client = HostnameClient::new("http://example.test/").unwrap();
        assert_eq!(client.url("/get"), "http://example.test/get");
        assert_eq!(client.url("anything"), "http://example.test/anything");
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_get_public_endpoint() {
        let client = HostnameClient::new("http://httpbin.org").unwrap().attempts(2);
        let response = client.get("/status/200").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
