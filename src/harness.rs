//! Entry point tying settings, cluster handles and capabilities together
//!
//! A [`Harness`] answers two questions for a test: should it run at all, and
//! with which resources. The capability registry behind it is shared by every
//! harness in the process, so the clusters are probed once per run.

use crate::config::Settings;
use crate::decision::{decide, decide_all, describe, Requirement, RunMode, Verdict};
use crate::environment::Environment;
use crate::error::HarnessError;
use crate::gateway::{FactoryOptions, Topology};
use crate::lifecycle::{Lifecycle, LifecycleOptions};
use crate::naming::{whoami, Namer};
use crate::probe::Prober;
use crate::registry::CapabilityRegistry;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

static REGISTRY: OnceLock<Arc<CapabilityRegistry>> = OnceLock::new();

pub struct Harness {
    settings: Settings,
    environment: Environment,
    registry: Arc<CapabilityRegistry>,
}

impl Harness {
    #[must_use]
    pub fn new(
        settings: Settings,
        environment: Environment,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            settings,
            environment,
            registry,
        }
    }

    /// Harness with its own registry probing `environment`
    #[must_use]
    pub fn probing(settings: Settings, environment: Environment) -> Self {
        let registry = Arc::new(CapabilityRegistry::new(Prober::new(
            environment.probe_targets(),
        )));
        Self::new(settings, environment, registry)
    }

    /// Harness configured from the environment, sharing the process-wide registry
    pub async fn shared() -> Result<Self, HarnessError> {
        let settings = Settings::from_env()?;
        let environment = Environment::connect(&settings).await;
        let registry = REGISTRY
            .get_or_init(|| {
                Arc::new(CapabilityRegistry::new(Prober::new(
                    environment.probe_targets(),
                )))
            })
            .clone();
        Ok(Self::new(settings, environment, registry))
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn run_mode(&self) -> RunMode {
        RunMode {
            strict: self.settings.strict,
            performance: self.settings.performance,
        }
    }

    pub async fn has_kuadrant(&self) -> (bool, String) {
        self.registry.has_kuadrant().await
    }

    pub async fn is_standalone(&self) -> (bool, String) {
        self.registry.is_standalone().await
    }

    pub async fn has_mgc(&self) -> (bool, String) {
        self.registry.has_mgc().await
    }

    /// Verdict for a test with `requirements`
    ///
    /// Skip and failure reasons are the messages shown to the user.
    #[instrument(skip(self))]
    pub async fn gate(&self, requirements: &[Requirement]) -> Verdict {
        let report = self.registry.report().await;
        let (verdict, requirement) = decide_all(report, requirements, self.run_mode());
        debug!(%verdict, "Decided");

        match (verdict, requirement) {
            (Verdict::Skip(reason), Some(requirement)) => {
                Verdict::Skip(describe(requirement, &Verdict::Skip(reason)))
            }
            (Verdict::Fail(reason), Some(requirement)) => {
                Verdict::Fail(describe(requirement, &Verdict::Fail(reason)))
            }
            (verdict, _) => verdict,
        }
    }

    /// Gateway family tests get when they do not ask for one
    pub async fn topology(&self) -> Topology {
        let report = self.registry.report().await;
        let kuadrant = decide(report, Requirement::Kuadrant, RunMode::default());
        Topology::select(&kuadrant, self.settings.standalone)
    }

    /// Resource scope for the test identified by `test_id`
    ///
    /// Fails when the primary project is unreachable; missing configuration
    /// yields an error with [`HarnessError::is_skip`] set.
    pub async fn lifecycle(&self, test_id: &str) -> Result<Lifecycle, HarnessError> {
        let project = self.environment.project().await?;

        let actor = self.settings.actor.clone().unwrap_or_else(whoami);
        let namer = Namer::new(&actor, test_id).tail(self.settings.name_tail);

        let report = self.registry.report().await;
        let kuadrant = decide(report, Requirement::Kuadrant, RunMode::default());
        let topology = Topology::select(&kuadrant, self.settings.standalone);

        let wildcard_domain = match topology {
            Topology::Kuadrant => self.environment.wildcard_domain().await?,
            Topology::Standalone => String::new(),
        };

        let options = LifecycleOptions {
            backend_image: self.settings.backend_image.clone(),
            factory: FactoryOptions {
                wildcard_domain,
                envoy_image: self.settings.envoy_image.clone(),
                authorino: None,
                force_standalone: self.settings.standalone,
            },
            system_project: self.settings.system_project.clone(),
            skip_cleanup: self.settings.skip_cleanup,
        };

        debug!(test = test_id, %topology, "Opening resource scope");
        Ok(Lifecycle::new(project, namer, kuadrant, options))
    }
}
