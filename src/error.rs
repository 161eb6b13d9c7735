//! Error taxonomy of the harness
//!
//! Probing never surfaces these: the prober folds every failure into a
//! capability reason. They appear at the fixture boundary (setup of a test
//! scope) and from resource commits.

use crate::cluster::ClusterError;
use crate::config::ConfigError;

/// Errors raised while preparing or running a test scope
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A cluster handle is not connected
    #[error("{0}")]
    ConnectionUnavailable(String),

    /// An expected custom resource is missing
    #[error("{0}")]
    ResourceNotFound(String),

    /// A required configuration item is absent
    #[error("configuration item is missing: {0}")]
    ConfigurationMissing(String),

    /// A mutate action against the cluster failed
    #[error("failed to commit {kind} '{name}': {source}")]
    CommitFailure {
        kind: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    /// An identity provider rejected the configured credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Malformed settings
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    pub(crate) fn commit(kind: &str, name: &str, source: ClusterError) -> Self {
        Self::CommitFailure {
            kind: kind.to_string(),
            name: name.to_string(),
            source,
        }
    }

    /// Whether this error should skip the test rather than fail it
    ///
    /// Missing configuration and rejected credentials usually point at the
    /// test environment, not at the system under test.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationMissing(_) | Self::AuthenticationFailure(_)
        )
    }
}
