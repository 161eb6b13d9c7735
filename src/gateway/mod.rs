//! Gateways and routes
//!
//! Two families implement the same traits:
//!
//! - Kuadrant: a Gateway API `Gateway` reconciled by the control plane, with
//!   `HTTPRoute`s attached to it
//! - Standalone: an Envoy deployment calling a standalone Authorino, with
//!   virtual hosts in its ConfigMap as routes
//!
//! [`select_gateway_factory`] picks the family once per test scope; nothing
//! past that point knows which one it got.

use crate::cluster::ClusterHandle;
use crate::decision::Verdict;
use crate::error::HarnessError;
use crate::resource::{AuthorinoRef, Backend, Labels, TestResource};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

mod envoy;
mod kuadrant;

pub use envoy::{EnvoyFactory, EnvoyGateway, EnvoyVirtualRoute};
pub use kuadrant::{HttpRoute, KuadrantFactory, KuadrantGateway};

/// Shown when the standalone family is selected without an Authorino
pub const AUTHORINO_REQUIRED: &str = "standalone gateway requires an Authorino instance";

/// Entry point for traffic into the cluster
pub trait Gateway: TestResource {
    /// Gateway API `parentRef` style reference
    fn reference(&self) -> Value;

    /// Service a hostname should point at
    fn service_name(&self) -> String;

    fn service_port(&self) -> u16;
}

/// Routing rules attaching hostnames and backends to a gateway
pub trait GatewayRoute: TestResource {
    /// Add a hostname; adding one twice has no effect
    fn add_hostname(&mut self, hostname: &str);

    /// Remove a hostname; removing an absent one has no effect
    fn remove_hostname(&mut self, hostname: &str);

    fn remove_all_hostnames(&mut self);

    /// Send traffic to `backend`
    fn add_backend(&mut self, backend: &Backend);

    fn hostnames(&self) -> Vec<String>;
}

/// Builds the gateway and routes of one family
pub trait GatewayFactory: Send + Sync {
    fn topology(&self) -> Topology;

    /// Desired gateway named `name`
    fn gateway(
        &self,
        cluster: Arc<dyn ClusterHandle>,
        name: &str,
        labels: &Labels,
    ) -> Result<Box<dyn Gateway>, HarnessError>;

    /// Desired route on `gateway`
    fn route(
        &self,
        gateway: &dyn Gateway,
        name: &str,
        labels: &Labels,
    ) -> Result<Box<dyn GatewayRoute>, HarnessError>;
}

/// Deployment topology a test runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Kuadrant control plane with Gateway API
    Kuadrant,
    /// Envoy with standalone Authorino
    Standalone,
}

impl Topology {
    /// Kuadrant when its verdict is Proceed and standalone is not forced
    #[must_use]
    pub fn select(kuadrant: &Verdict, force_standalone: bool) -> Self {
        if kuadrant.is_proceed() && !force_standalone {
            Topology::Kuadrant
        } else {
            Topology::Standalone
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Kuadrant => f.write_str("kuadrant"),
            Topology::Standalone => f.write_str("standalone"),
        }
    }
}

/// Inputs shared by both families
#[derive(Debug, Clone, Default)]
pub struct FactoryOptions {
    /// Wildcard hostname the Kuadrant gateway listens on, e.g. `*.apps.example.com`
    pub wildcard_domain: String,
    pub envoy_image: String,
    /// Required for the standalone family
    pub authorino: Option<AuthorinoRef>,
    /// Use the standalone family even if Kuadrant is available
    pub force_standalone: bool,
}

/// Pick the gateway family from the Kuadrant verdict
pub fn select_gateway_factory(
    kuadrant: &Verdict,
    options: FactoryOptions,
) -> Result<Box<dyn GatewayFactory>, HarnessError> {
    match Topology::select(kuadrant, options.force_standalone) {
        Topology::Kuadrant => Ok(Box::new(KuadrantFactory::new(&options.wildcard_domain))),
        Topology::Standalone => {
            let authorino = options
                .authorino
                .ok_or_else(|| HarnessError::ConfigurationMissing(AUTHORINO_REQUIRED.to_string()))?;
            Ok(Box::new(EnvoyFactory::new(&options.envoy_image, authorino)))
        }
    }
}
