//! Resources of one test scope
//!
//! A [`Lifecycle`] owns the cleanup [`Scope`] of a test and creates every
//! resource through it, so everything committed is finalized exactly once in
//! reverse order when the scope closes. It knows the topology chosen for the
//! test and builds gateways and routes of the matching family.

use crate::cluster::{ClusterError, ClusterHandle};
use crate::decision::Verdict;
use crate::error::HarnessError;
use crate::gateway::{
    select_gateway_factory, FactoryOptions, Gateway, GatewayFactory, GatewayRoute, Topology,
};
use crate::kuadrant::KuadrantCr;
use crate::naming::{randomize, Namer};
use crate::resource::{
    Authorino, Backend, CleanupReport, ExposedHostname, Finalizer, Labels, Scope, TestResource,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Label key carrying the module label
pub const APP_LABEL: &str = "app";

/// Inputs a [`Lifecycle`] needs besides the cluster
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    pub backend_image: String,
    /// Gateway inputs; a standalone Authorino is created when none is given
    pub factory: FactoryOptions,
    /// Namespace holding the Kuadrant resource
    pub system_project: String,
    pub skip_cleanup: bool,
}

/// Backend reachable through a gateway under an exposed hostname
pub struct Stack {
    pub backend: Backend,
    pub gateway: Box<dyn Gateway>,
    pub hostname: ExposedHostname,
    pub route: Box<dyn GatewayRoute>,
}

impl Stack {
    /// Hostname the route serves
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.hostname()
    }
}

/// Creates and tracks the resources of one test scope
pub struct Lifecycle {
    cluster: Arc<dyn ClusterHandle>,
    namer: Namer,
    labels: Labels,
    kuadrant: Verdict,
    options: LifecycleOptions,
    factory: Option<Arc<dyn GatewayFactory>>,
    scope: Scope,
}

impl Lifecycle {
    /// `kuadrant` is the verdict of the Kuadrant requirement; it picks the
    /// gateway family together with `force_standalone`
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        namer: Namer,
        kuadrant: Verdict,
        options: LifecycleOptions,
    ) -> Self {
        let module_label = randomize(&namer.label(), crate::config::DEFAULT_NAME_TAIL);
        let labels = [(APP_LABEL.to_string(), module_label)].into_iter().collect();
        let scope = Scope::new().skip_cleanup(options.skip_cleanup);

        Self {
            cluster,
            namer,
            labels,
            kuadrant,
            options,
            factory: None,
            scope,
        }
    }

    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn ClusterHandle> {
        &self.cluster
    }

    #[must_use]
    pub fn namer(&self) -> &Namer {
        &self.namer
    }

    /// Labels put on every resource of this scope
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    #[must_use]
    pub fn topology(&self) -> Topology {
        Topology::select(&self.kuadrant, self.options.factory.force_standalone)
    }

    /// Name scoped to this test
    #[must_use]
    pub fn blame(&self, base: &str) -> String {
        self.namer.blame(base)
    }

    /// Register extra cleanup, run in reverse order with the resources
    pub fn defer(&mut self, description: impl Into<String>, finalizer: Finalizer) {
        self.scope.defer(description, finalizer);
    }

    /// Commit through the scope; a resource committed for the first time is
    /// registered for cleanup
    pub async fn commit<R>(&mut self, resource: &mut R) -> Result<(), HarnessError>
    where
        R: TestResource + ?Sized,
    {
        self.scope.commit(resource).await
    }

    /// Descriptions of resources not yet cleaned up
    #[must_use]
    pub fn pending(&self) -> Vec<&str> {
        self.scope.pending()
    }

    /// Deploy an httpbin backend
    pub async fn create_backend(&mut self) -> Result<Backend, HarnessError> {
        let name = self.blame("httpbin");
        let mut backend = Backend::new(
            self.cluster.clone(),
            &name,
            &self.options.backend_image,
            &self.labels,
        )?;
        self.scope.commit(&mut backend).await?;
        Ok(backend)
    }

    /// Deploy a standalone Authorino watching AuthConfigs matching `selector`
    pub async fn create_authorino(
        &mut self,
        selector: Option<&str>,
    ) -> Result<Authorino, HarnessError> {
        let name = self.blame("authorino");
        let mut authorino = Authorino::new(self.cluster.clone(), &name, &self.labels, selector);
        self.scope.commit(&mut authorino).await?;
        Ok(authorino)
    }

    /// Factory of the chosen family, built on first use
    ///
    /// The standalone family needs an Authorino; one is created in this
    /// scope unless the options name an existing one.
    pub async fn factory(&mut self) -> Result<Arc<dyn GatewayFactory>, HarnessError> {
        if let Some(factory) = &self.factory {
            return Ok(factory.clone());
        }

        let mut options = self.options.factory.clone();
        if self.topology() == Topology::Standalone && options.authorino.is_none() {
            let authorino = self.create_authorino(None).await?;
            options.authorino = Some(authorino.reference());
        }

        let factory: Arc<dyn GatewayFactory> =
            Arc::from(select_gateway_factory(&self.kuadrant, options)?);
        info!(topology = %factory.topology(), "Selected gateway family");
        self.factory = Some(factory.clone());
        Ok(factory)
    }

    /// Deploy a gateway of the chosen family
    pub async fn create_gateway(&mut self) -> Result<Box<dyn Gateway>, HarnessError> {
        let factory = self.factory().await?;
        let name = self.blame("gw");
        let mut gateway = factory.gateway(self.cluster.clone(), &name, &self.labels)?;
        self.scope.commit(gateway.as_mut()).await?;
        Ok(gateway)
    }

    /// Expose `gateway` under a router-assigned hostname
    pub async fn expose_hostname(
        &mut self,
        gateway: &dyn Gateway,
    ) -> Result<ExposedHostname, HarnessError> {
        let name = self.blame("hostname");
        let mut hostname = ExposedHostname::new(
            gateway.cluster().clone(),
            &name,
            &gateway.service_name(),
            gateway.service_port(),
            &self.labels,
        );
        self.scope.commit(&mut hostname).await?;
        Ok(hostname)
    }

    /// Route `hostname` on `gateway` to `backend`
    pub async fn create_route(
        &mut self,
        gateway: &dyn Gateway,
        hostname: &str,
        backend: &Backend,
    ) -> Result<Box<dyn GatewayRoute>, HarnessError> {
        let factory = self.factory().await?;
        let name = self.blame("route");
        let mut route = factory.route(gateway, &name, &self.labels)?;
        route.add_hostname(hostname);
        route.add_backend(backend);
        self.scope.commit(route.as_mut()).await?;
        Ok(route)
    }

    /// Backend, gateway, hostname and route, in dependency order
    ///
    /// On failure the resources committed so far stay registered and are
    /// removed when the scope closes.
    #[instrument(skip(self), fields(context = %self.namer.context()))]
    pub async fn setup(&mut self) -> Result<Stack, HarnessError> {
        let backend = self.create_backend().await?;
        let gateway = self.create_gateway().await?;
        let hostname = self.expose_hostname(gateway.as_ref()).await?;

        let host = hostname
            .hostname()
            .map(ToString::to_string)
            .ok_or_else(|| {
                ClusterError::InvalidObject(format!("Route '{}' has no spec.host", hostname.name()))
            })?;
        let route = self.create_route(gateway.as_ref(), &host, &backend).await?;

        debug!(host = %host, "Stack ready");
        Ok(Stack {
            backend,
            gateway,
            hostname,
            route,
        })
    }

    /// The deployed Kuadrant resource
    pub async fn kuadrant(&self) -> Result<KuadrantCr, HarnessError> {
        let system = self.cluster.change_project(&self.options.system_project);
        KuadrantCr::fetch(system).await
    }

    /// Run every registered finalizer, newest first
    pub async fn close(&mut self) -> CleanupReport {
        self.scope.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Gvr, MemoryCluster};
    use crate::resource::AuthorinoRef;

    fn options() -> LifecycleOptions {
        LifecycleOptions {
            backend_image: "httpbin:latest".to_string(),
            factory: FactoryOptions {
                wildcard_domain: "*.apps.example.com".to_string(),
                envoy_image: "envoy:latest".to_string(),
                ..Default::default()
            },
            system_project: "kuadrant-system".to_string(),
            skip_cleanup: false,
        }
    }

    fn lifecycle(cluster: &MemoryCluster, kuadrant: Verdict) -> Lifecycle {
        Lifecycle::new(
            Arc::new(cluster.clone()),
            Namer::new("alice", "tests::auth::test_identity"),
            kuadrant,
            options(),
        )
    }

    #[tokio::test]
    async fn test_kuadrant_setup_and_close() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut ctx = lifecycle(&cluster, Verdict::Proceed);
        assert_eq!(ctx.topology(), Topology::Kuadrant);

        let stack = ctx.setup().await.unwrap();
        assert!(stack.route.is_committed());
        assert_eq!(stack.route.hostnames(), vec![stack.hostname().unwrap().to_string()]);
        assert!(stack.gateway.name().starts_with("gw-alice-identty-"));
        assert_eq!(ctx.pending().len(), 4);

        let report = ctx.close().await;
        assert!(report.is_clean());
        assert_eq!(report.completed, 4);
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_standalone_creates_authorino_once() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut ctx = lifecycle(&cluster, Verdict::Skip("Gateway API is turned off".into()));
        assert_eq!(ctx.topology(), Topology::Standalone);

        let stack = ctx.setup().await.unwrap();
        assert_eq!(stack.gateway.kind(), "EnvoyGateway");
        assert_eq!(stack.route.kind(), "EnvoyVirtualRoute");

        let authorinos = cluster
            .calls()
            .iter()
            .filter(|call| {
                matches!(call, crate::cluster::ClusterCall::Apply { kind, .. } if kind == "Authorino")
            })
            .count();
        assert_eq!(authorinos, 1);

        ctx.close().await;
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_standalone_uses_given_authorino() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut options = options();
        options.factory.force_standalone = true;
        options.factory.authorino = Some(AuthorinoRef {
            name: "shared".to_string(),
            namespace: "authorino".to_string(),
        });
        let mut ctx = Lifecycle::new(
            Arc::new(cluster.clone()),
            Namer::new("alice", "test_identity"),
            Verdict::Proceed,
            options,
        );

        let gateway = ctx.create_gateway().await.unwrap();
        assert_eq!(gateway.kind(), "EnvoyGateway");
        assert!(cluster.object(&Gvr::authorino(), "shared").is_none());
        assert_eq!(ctx.pending().len(), 1);
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_labels_carry_module_label() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        let mut ctx = lifecycle(&cluster, Verdict::Proceed);

        let label = ctx.labels()[APP_LABEL].clone();
        assert!(label.starts_with("testrun-alice-identty-"));

        let backend = ctx.create_backend().await.unwrap();
        let stored = cluster.object(&Gvr::deployment(), backend.name()).unwrap();
        assert_eq!(
            stored.pointer("/metadata/labels/app").and_then(|v| v.as_str()),
            Some(label.as_str())
        );
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_kuadrant_lookup_uses_system_project() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        cluster.view("kuadrant-system").insert(
            &Gvr::kuadrant(),
            serde_json::json!({"metadata": {"name": "kuadrant"}, "spec": {}}),
        );
        let ctx = lifecycle(&cluster, Verdict::Proceed);

        assert_eq!(ctx.kuadrant().await.unwrap().name(), "kuadrant");
    }
}
