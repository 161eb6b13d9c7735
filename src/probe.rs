//! Capability probing
//!
//! Issues a small fixed set of read-only queries against the configured
//! clusters and folds the answers into a [`CapabilityReport`]. Probing never
//! fails: any error from a cluster becomes the reason of a missing capability.

use crate::capability::CapabilityReport;
use crate::cluster::{ClusterHandle, Gvr};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const GATEWAY_API_OFF: &str = "Gateway API is turned off";
pub const SPOKES_NOT_CONFIGURED: &str = "Spokes are not configured";
pub const HUB_NOT_CONFIGURED: &str = "Control Plane Hub is not configured";
pub const HUB_NOT_CONNECTED: &str = "Control Plane Hub Openshift is not connected";
pub const MGC_RESOURCES_MISSING: &str = "MGC custom resources are missing on hub cluster";

/// API group and resource whose presence on the hub identifies MGC
const MGC_API_GROUP: &str = "kuadrant.io";
const MGC_RESOURCE: &str = "managedzones";

/// Clusters and flags the prober looks at
#[derive(Clone)]
pub struct ProbeTargets {
    pub gateway_api: bool,
    /// Project expected to hold the Kuadrant resource on every spoke
    pub system_project: String,
    pub hub: Option<Arc<dyn ClusterHandle>>,
    /// Spokes by name; iteration order decides which failing spoke is reported
    pub spokes: BTreeMap<String, Arc<dyn ClusterHandle>>,
}

impl ProbeTargets {
    pub fn new(system_project: impl Into<String>) -> Self {
        Self {
            gateway_api: true,
            system_project: system_project.into(),
            hub: None,
            spokes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn gateway_api(mut self, enabled: bool) -> Self {
        self.gateway_api = enabled;
        self
    }

    #[must_use]
    pub fn hub(mut self, hub: Arc<dyn ClusterHandle>) -> Self {
        self.hub = Some(hub);
        self
    }

    #[must_use]
    pub fn spoke(mut self, name: impl Into<String>, handle: Arc<dyn ClusterHandle>) -> Self {
        self.spokes.insert(name.into(), handle);
        self
    }
}

/// Detects which topology is deployed
pub struct Prober {
    targets: ProbeTargets,
}

impl Prober {
    #[must_use]
    pub fn new(targets: ProbeTargets) -> Self {
        Self { targets }
    }

    /// Run both probes and derive the full report
    #[instrument(skip(self), fields(spokes = self.targets.spokes.len()))]
    pub async fn probe(&self) -> CapabilityReport {
        let (kuadrant, mgc) = tokio::join!(self.has_kuadrant(), self.has_mgc());
        let report = CapabilityReport::from_probes(kuadrant, mgc);

        info!(
            available = ?report.available(),
            missing = ?report.missing(),
            "Capabilities probed"
        );

        report
    }

    /// Whether every spoke runs a Kuadrant deployment
    ///
    /// Conditions are checked in priority order: Gateway API switch, spoke
    /// connectivity, then presence of the Kuadrant resource. Spokes are
    /// queried concurrently within each phase and the first failing spoke
    /// by name is reported.
    pub async fn has_kuadrant(&self) -> Result<(), String> {
        if !self.targets.gateway_api {
            return Err(GATEWAY_API_OFF.to_string());
        }

        let spokes = &self.targets.spokes;

        let connectivity = join_all(
            spokes
                .iter()
                .map(|(name, handle)| async move { (name, handle.connected().await) }),
        )
        .await;

        if let Some((name, _)) = connectivity.iter().find(|(_, connected)| !connected) {
            return Err(format!("Spoke {name} is not connected"));
        }

        let project = self.targets.system_project.as_str();
        let listings = join_all(spokes.iter().map(|(name, handle)| async move {
            let system = handle.change_project(project);
            (name, system.list(&Gvr::kuadrant()).await)
        }))
        .await;

        for (name, listing) in listings {
            match listing {
                Ok(items) if items.is_empty() => {
                    return Err(format!(
                        "Spoke {name} does not have Kuadrant resource in project {project}"
                    ));
                }
                Ok(items) => {
                    debug!(spoke = %name, count = items.len(), "Found Kuadrant resources");
                }
                Err(e) => return Err(e.to_string()),
            }
        }

        Ok(())
    }

    /// Whether the multicluster gateway controller runs on the hub
    pub async fn has_mgc(&self) -> Result<(), String> {
        if !self.targets.gateway_api {
            return Err(GATEWAY_API_OFF.to_string());
        }

        if self.targets.spokes.is_empty() {
            return Err(SPOKES_NOT_CONFIGURED.to_string());
        }

        let Some(hub) = &self.targets.hub else {
            return Err(HUB_NOT_CONFIGURED.to_string());
        };

        if !hub.connected().await {
            return Err(HUB_NOT_CONNECTED.to_string());
        }

        match hub.api_resources(MGC_API_GROUP).await {
            Ok(resources) if resources.iter().any(|r| r == MGC_RESOURCE) => Ok(()),
            Ok(_) => Err(MGC_RESOURCES_MISSING.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}
