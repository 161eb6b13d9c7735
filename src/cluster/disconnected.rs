use super::{ClusterError, ClusterHandle, Gvr};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A configured cluster whose client could not be built
///
/// Reports itself as not connected and fails every action with the
/// original connection error, so probing can turn it into a reason.
#[derive(Debug, Clone)]
pub struct DisconnectedCluster {
    name: String,
    project: String,
    reason: String,
}

impl DisconnectedCluster {
    #[must_use]
    pub fn new(name: &str, project: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn unavailable(&self) -> ClusterError {
        ClusterError::Unavailable(format!("{}: {}", self.name, self.reason))
    }
}

#[async_trait]
impl ClusterHandle for DisconnectedCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn connected(&self) -> bool {
        false
    }

    fn change_project(&self, project: &str) -> Arc<dyn ClusterHandle> {
        Arc::new(Self::new(&self.name, project, self.reason.clone()))
    }

    async fn list(&self, _gvr: &Gvr) -> Result<Vec<Value>, ClusterError> {
        Err(self.unavailable())
    }

    async fn get(&self, _gvr: &Gvr, _name: &str) -> Result<Value, ClusterError> {
        Err(self.unavailable())
    }

    async fn apply(&self, _gvr: &Gvr, _object: &Value) -> Result<Value, ClusterError> {
        Err(self.unavailable())
    }

    async fn delete(&self, _gvr: &Gvr, _name: &str) -> Result<(), ClusterError> {
        Err(self.unavailable())
    }

    async fn api_resources(&self, _group: &str) -> Result<Vec<String>, ClusterError> {
        Err(self.unavailable())
    }

    async fn apps_domain(&self) -> Result<String, ClusterError> {
        Err(self.unavailable())
    }
}
