//! Harness configuration
//!
//! Build [`Settings`] programmatically, or overlay the defaults with
//! `KUADRANT_E2E_*` environment variables via [`Settings::from_env`].
//!
//! # Example
//!
//! ```
//! use kuadrant_e2e::config::{ClusterTarget, Settings};
//!
//! let settings = Settings::new(ClusterTarget::new("primary", "kuadrant"))
//!     .system_project("kuadrant-system")
//!     .hub(ClusterTarget::new("hub", "multi-cluster-gateways").context("hub-admin"))
//!     .spoke("east", ClusterTarget::new("east", "kuadrant").context("east-admin"))
//!     .strict(true);
//!
//! assert_eq!(settings.spokes.len(), 1);
//! ```

use std::collections::BTreeMap;

/// Default namespace holding the Kuadrant / Authorino / Limitador operators
pub const DEFAULT_SYSTEM_PROJECT: &str = "kuadrant-system";

/// Default namespace where tests create their resources
pub const DEFAULT_PROJECT: &str = "kuadrant";

/// Default Envoy image for the standalone gateway
pub const DEFAULT_ENVOY_IMAGE: &str = "docker.io/envoyproxy/envoy:v1.27-latest";

/// Default httpbin image for backends
pub const DEFAULT_BACKEND_IMAGE: &str = "quay.io/jsmadis/httpbin:latest";

/// Default length of the random suffix of generated names
pub const DEFAULT_NAME_TAIL: usize = 3;

/// Errors from reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: expected a boolean, got '{value}'")]
    InvalidBool { key: String, value: String },

    #[error("{key}: expected a number, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("{key}: invalid cluster entry '{value}' (expected name=context[/namespace])")]
    InvalidCluster { key: String, value: String },
}

/// Where to find one cluster project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    /// Display name (spoke name, "hub", ...)
    pub name: String,

    /// Kubeconfig context, `None` for the current context
    pub context: Option<String>,

    /// Kubeconfig path, `None` for the default lookup
    pub kubeconfig: Option<String>,

    /// Active project (namespace)
    pub project: String,
}

impl ClusterTarget {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: None,
            kubeconfig: None,
            project: project.into(),
        }
    }

    /// Set kubectl context
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set kubeconfig path
    pub fn kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Parse `context[/namespace]`
    fn parse(name: &str, spec: &str, default_project: &str) -> Option<Self> {
        let (context, project) = match spec.split_once('/') {
            Some((context, project)) => (context.trim(), project.trim()),
            None => (spec.trim(), default_project),
        };
        if context.is_empty() || project.is_empty() {
            return None;
        }
        Some(Self::new(name, project).context(context))
    }
}

/// Full harness configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether Gateway API is available; `false` disables Kuadrant and MGC
    pub gateway_api: bool,

    /// Force the standalone (Envoy + Authorino) topology
    pub standalone: bool,

    /// Fail tests instead of skipping them when a capability is missing
    pub strict: bool,

    /// Also run performance tests
    pub performance: bool,

    /// Leave created resources behind
    pub skip_cleanup: bool,

    /// Primary project where tests create resources
    pub project: ClusterTarget,

    /// Secondary project on the primary cluster
    pub project2: Option<String>,

    /// Namespace holding the operators and the Kuadrant CR
    pub system_project: String,

    /// Multi-cluster hub
    pub hub: Option<ClusterTarget>,

    /// Spokes by name
    pub spokes: BTreeMap<String, ClusterTarget>,

    /// Apps domain override; queried from the cluster when unset
    pub apps_domain: Option<String>,

    pub envoy_image: String,

    pub backend_image: String,

    /// Length of the random suffix of generated names
    pub name_tail: usize,

    /// Actor used in generated names; defaults to the current user
    pub actor: Option<String>,
}

impl Settings {
    /// Settings with defaults for the given primary project
    pub fn new(project: ClusterTarget) -> Self {
        Self {
            gateway_api: true,
            standalone: false,
            strict: false,
            performance: false,
            skip_cleanup: false,
            project,
            project2: None,
            system_project: DEFAULT_SYSTEM_PROJECT.to_string(),
            hub: None,
            spokes: BTreeMap::new(),
            apps_domain: None,
            envoy_image: DEFAULT_ENVOY_IMAGE.to_string(),
            backend_image: DEFAULT_BACKEND_IMAGE.to_string(),
            name_tail: DEFAULT_NAME_TAIL,
            actor: None,
        }
    }

    /// Defaults overlaid with `KUADRANT_E2E_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// Recognized keys:
    /// - `KUADRANT_E2E_GATEWAY_API`, `KUADRANT_E2E_STANDALONE`,
    ///   `KUADRANT_E2E_ENFORCE`, `KUADRANT_E2E_PERFORMANCE`,
    ///   `KUADRANT_E2E_SKIP_CLEANUP` (booleans)
    /// - `KUADRANT_E2E_PROJECT`, `KUADRANT_E2E_PROJECT2`,
    ///   `KUADRANT_E2E_SYSTEM_PROJECT`, `KUADRANT_E2E_CONTEXT`
    /// - `KUADRANT_E2E_HUB` (`context[/namespace]`)
    /// - `KUADRANT_E2E_SPOKES` (`name=context[/namespace],...`)
    /// - `KUADRANT_E2E_APPS_DOMAIN`, `KUADRANT_E2E_ENVOY_IMAGE`,
    ///   `KUADRANT_E2E_BACKEND_IMAGE`, `KUADRANT_E2E_NAME_TAIL`,
    ///   `KUADRANT_E2E_ACTOR`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_name = get("KUADRANT_E2E_PROJECT").unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        let mut project = ClusterTarget::new("primary", project_name);
        project.context = get("KUADRANT_E2E_CONTEXT");

        let mut settings = Self::new(project);

        if let Some(value) = get("KUADRANT_E2E_GATEWAY_API") {
            settings.gateway_api = parse_bool("KUADRANT_E2E_GATEWAY_API", &value)?;
        }
        if let Some(value) = get("KUADRANT_E2E_STANDALONE") {
            settings.standalone = parse_bool("KUADRANT_E2E_STANDALONE", &value)?;
        }
        if let Some(value) = get("KUADRANT_E2E_ENFORCE") {
            settings.strict = parse_bool("KUADRANT_E2E_ENFORCE", &value)?;
        }
        if let Some(value) = get("KUADRANT_E2E_PERFORMANCE") {
            settings.performance = parse_bool("KUADRANT_E2E_PERFORMANCE", &value)?;
        }
        if let Some(value) = get("KUADRANT_E2E_SKIP_CLEANUP") {
            settings.skip_cleanup = parse_bool("KUADRANT_E2E_SKIP_CLEANUP", &value)?;
        }

        settings.project2 = get("KUADRANT_E2E_PROJECT2");
        if let Some(system) = get("KUADRANT_E2E_SYSTEM_PROJECT") {
            settings.system_project = system;
        }

        if let Some(value) = get("KUADRANT_E2E_HUB") {
            let hub = ClusterTarget::parse("hub", &value, &settings.system_project).ok_or_else(
                || ConfigError::InvalidCluster {
                    key: "KUADRANT_E2E_HUB".to_string(),
                    value: value.clone(),
                },
            )?;
            settings.hub = Some(hub);
        }

        if let Some(value) = get("KUADRANT_E2E_SPOKES") {
            for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let invalid = || ConfigError::InvalidCluster {
                    key: "KUADRANT_E2E_SPOKES".to_string(),
                    value: entry.to_string(),
                };
                let (name, spec) = entry.split_once('=').ok_or_else(invalid)?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(invalid());
                }
                let target = ClusterTarget::parse(name, spec, &settings.project.project)
                    .ok_or_else(invalid)?;
                settings.spokes.insert(name.to_string(), target);
            }
        }

        settings.apps_domain = get("KUADRANT_E2E_APPS_DOMAIN");
        if let Some(image) = get("KUADRANT_E2E_ENVOY_IMAGE") {
            settings.envoy_image = image;
        }
        if let Some(image) = get("KUADRANT_E2E_BACKEND_IMAGE") {
            settings.backend_image = image;
        }
        if let Some(value) = get("KUADRANT_E2E_NAME_TAIL") {
            settings.name_tail = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "KUADRANT_E2E_NAME_TAIL".to_string(),
                    value: value.clone(),
                })?;
        }
        settings.actor = get("KUADRANT_E2E_ACTOR");

        Ok(settings)
    }

    pub fn gateway_api(mut self, enabled: bool) -> Self {
        self.gateway_api = enabled;
        self
    }

    pub fn standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn performance(mut self, performance: bool) -> Self {
        self.performance = performance;
        self
    }

    pub fn skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    pub fn project2(mut self, project: impl Into<String>) -> Self {
        self.project2 = Some(project.into());
        self
    }

    pub fn system_project(mut self, project: impl Into<String>) -> Self {
        self.system_project = project.into();
        self
    }

    pub fn hub(mut self, hub: ClusterTarget) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Add a spoke, keyed by name
    pub fn spoke(mut self, name: impl Into<String>, target: ClusterTarget) -> Self {
        self.spokes.insert(name.into(), target);
        self
    }

    pub fn apps_domain(mut self, domain: impl Into<String>) -> Self {
        self.apps_domain = Some(domain.into());
        self
    }

    pub fn name_tail(mut self, tail: usize) -> Self {
        self.name_tail = tail;
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
