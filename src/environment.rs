//! Cluster handles for one test run
//!
//! [`Environment::connect`] turns [`Settings`] into handles: the primary
//! project, the optional secondary project on the same cluster, the hub and
//! the spokes. Building a handle never fails the run; an unreachable target
//! becomes a [`DisconnectedCluster`] and the failure surfaces later, either
//! as a capability reason or at the fixture boundary.

use crate::cluster::{ClusterHandle, DisconnectedCluster, KubeCluster};
use crate::config::{ClusterTarget, Settings};
use crate::error::HarnessError;
use crate::probe::ProbeTargets;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Shown when the primary project is unusable
pub const NOT_LOGGED_IN: &str = "You are not logged into Openshift or the namespace doesn't exist";

/// Shown when the secondary project exists in config but is unusable
pub const PROJECT2_NOT_LOGGED_IN: &str =
    "You are not logged into Openshift or the namespace for Openshift2 doesn't exist";

/// Shown when a test needs the secondary project and none is configured
pub const PROJECT2_MISSING: &str = "Openshift2 required but second_project was not set";

/// Connected (or explicitly disconnected) handles for every configured target
#[derive(Clone)]
pub struct Environment {
    gateway_api: bool,
    system_project: String,
    apps_domain: Option<String>,
    project: Arc<dyn ClusterHandle>,
    project2: Option<Arc<dyn ClusterHandle>>,
    hub: Option<Arc<dyn ClusterHandle>>,
    spokes: BTreeMap<String, Arc<dyn ClusterHandle>>,
}

/// Build a handle, or a disconnected stand-in carrying the error
async fn handle_for(target: &ClusterTarget) -> Arc<dyn ClusterHandle> {
    match KubeCluster::connect(target).await {
        Ok(cluster) => Arc::new(cluster),
        Err(e) => {
            warn!(cluster = %target.name, error = %e, "Cluster client unavailable");
            Arc::new(DisconnectedCluster::new(
                &target.name,
                &target.project,
                e.to_string(),
            ))
        }
    }
}

impl Environment {
    /// Build handles for everything `settings` names
    #[instrument(skip(settings), fields(project = %settings.project.project, spokes = settings.spokes.len()))]
    pub async fn connect(settings: &Settings) -> Self {
        let project = handle_for(&settings.project).await;

        let hub = match &settings.hub {
            Some(target) => Some(handle_for(target).await),
            None => None,
        };

        let spokes = join_all(
            settings
                .spokes
                .iter()
                .map(|(name, target)| async move { (name.clone(), handle_for(target).await) }),
        )
        .await
        .into_iter()
        .collect();

        let env = Self::with_project(settings, project).with_spokes(spokes);
        let env = match hub {
            Some(hub) => env.hub(hub),
            None => env,
        };

        info!(cluster = %env.project.name(), "Environment ready");
        env
    }

    /// Environment around an existing primary handle
    ///
    /// The secondary project, when configured, lives on the same cluster.
    /// Hub and spokes are added with [`Environment::hub`] and
    /// [`Environment::spoke`].
    pub fn with_project(settings: &Settings, project: Arc<dyn ClusterHandle>) -> Self {
        let project2 = settings
            .project2
            .as_deref()
            .map(|name| project.change_project(name));

        Self {
            gateway_api: settings.gateway_api,
            system_project: settings.system_project.clone(),
            apps_domain: settings.apps_domain.clone(),
            project,
            project2,
            hub: None,
            spokes: BTreeMap::new(),
        }
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

    fn with_spokes(mut self, spokes: BTreeMap<String, Arc<dyn ClusterHandle>>) -> Self {
        self.spokes = spokes;
        self
    }

    /// Primary project; fails if it is not reachable
    pub async fn project(&self) -> Result<Arc<dyn ClusterHandle>, HarnessError> {
        if !self.project.connected().await {
            return Err(HarnessError::ConnectionUnavailable(NOT_LOGGED_IN.to_string()));
        }
        Ok(self.project.clone())
    }

    /// Secondary project on the primary cluster
    ///
    /// Missing configuration skips the test, an unreachable project fails it.
    pub async fn project2(&self) -> Result<Arc<dyn ClusterHandle>, HarnessError> {
        let Some(project2) = &self.project2 else {
            return Err(HarnessError::ConfigurationMissing(PROJECT2_MISSING.to_string()));
        };
        if !project2.connected().await {
            return Err(HarnessError::ConnectionUnavailable(
                PROJECT2_NOT_LOGGED_IN.to_string(),
            ));
        }
        Ok(project2.clone())
    }

    /// Operator namespace on the primary cluster
    #[must_use]
    pub fn system(&self) -> Arc<dyn ClusterHandle> {
        self.project.change_project(&self.system_project)
    }

    #[must_use]
    pub fn system_project(&self) -> &str {
        &self.system_project
    }

    #[must_use]
    pub fn hub_handle(&self) -> Option<&Arc<dyn ClusterHandle>> {
        self.hub.as_ref()
    }

    #[must_use]
    pub fn spokes(&self) -> &BTreeMap<String, Arc<dyn ClusterHandle>> {
        &self.spokes
    }

    /// Wildcard hostname served by the cluster router, e.g. `*.apps.example.com`
    pub async fn wildcard_domain(&self) -> Result<String, HarnessError> {
        let domain = match &self.apps_domain {
            Some(domain) => domain.clone(),
            None => self.project.apps_domain().await?,
        };
        Ok(format!("*.{domain}"))
    }

    /// What the capability prober should look at
    #[must_use]
    pub fn probe_targets(&self) -> ProbeTargets {
        ProbeTargets {
            gateway_api: self.gateway_api,
            system_project: self.system_project.clone(),
            hub: self.hub.clone(),
            spokes: self.spokes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::config::ClusterTarget;

    fn settings() -> Settings {
        Settings::new(ClusterTarget::new("primary", "kuadrant"))
    }

    #[tokio::test]
    async fn test_disconnected_project_fails() {
        let cluster = MemoryCluster::new("primary", "kuadrant");
        cluster.set_connected(false);
        let env = Environment::with_project(&settings(), Arc::new(cluster));

        let err = env.project().await.err().unwrap();
        assert!(matches!(err, HarnessError::ConnectionUnavailable(_)));
        assert!(!err.is_skip());
        assert_eq!(err.to_string(), NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn test_project2_missing_skips() {
        let env = Environment::with_project(
            &settings(),
            Arc::new(MemoryCluster::new("primary", "kuadrant")),
        );

        let err = env.project2().await.err().unwrap();
        assert!(err.is_skip());
        assert!(err.to_string().contains(PROJECT2_MISSING));
    }

    #[tokio::test]
    async fn test_project2_shares_cluster() {
        let env = Environment::with_project(
            &settings().project2("kuadrant2"),
            Arc::new(MemoryCluster::new("primary", "kuadrant")),
        );

        let project2 = env.project2().await.unwrap();
        assert_eq!(project2.name(), "primary");
        assert_eq!(project2.project(), "kuadrant2");
        assert_eq!(env.system().project(), "kuadrant-system");
    }

    #[tokio::test]
    async fn test_wildcard_domain() {
        let cluster = MemoryCluster::new("primary", "kuadrant").with_apps_domain("apps.lab.test");
        let env = Environment::with_project(&settings(), Arc::new(cluster.clone()));
        assert_eq!(env.wildcard_domain().await.unwrap(), "*.apps.lab.test");

        let env = Environment::with_project(
            &settings().apps_domain("apps.override.test"),
            Arc::new(cluster),
        );
        assert_eq!(env.wildcard_domain().await.unwrap(), "*.apps.override.test");
    }

    #[test]
    fn test_probe_targets() {
        let env = Environment::with_project(
            &settings().gateway_api(false),
            Arc::new(MemoryCluster::new("primary", "kuadrant")),
        )
        .hub(Arc::new(MemoryCluster::new("hub", "mgc")))
        .spoke("east", Arc::new(MemoryCluster::new("east", "kuadrant")));

        let targets = env.probe_targets();
        assert!(!targets.gateway_api);
        assert!(targets.hub.is_some());
        assert_eq!(targets.spokes.len(), 1);
        assert_eq!(targets.system_project, "kuadrant-system");
    }

    #[tokio::test]
    #[ignore] // Requires kubeconfig
    async fn test_connect_current_context() {
        let env = Environment::connect(&settings()).await;
        assert!(env.project().await.is_ok());
    }
}
