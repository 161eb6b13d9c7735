//! Write-once cache of the probed capabilities
//!
//! The registry is constructed explicitly and handed to whatever needs it.
//! The first access runs the prober; concurrent first accesses wait for that
//! single run, and every later access reads the cached report.

use crate::capability::{Capability, CapabilityReport};
use crate::probe::Prober;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::OnceCell;
use tracing::debug;

pub struct CapabilityRegistry {
    prober: Option<Prober>,
    report: OnceCell<CapabilityReport>,
}

impl CapabilityRegistry {
    /// Registry that probes lazily on first access
    #[must_use]
    pub fn new(prober: Prober) -> Self {
        Self {
            prober: Some(prober),
            report: OnceCell::new(),
        }
    }

    /// Registry with an already known report
    #[must_use]
    pub fn from_report(report: CapabilityReport) -> Self {
        Self {
            prober: None,
            report: OnceCell::new_with(Some(report)),
        }
    }

    /// The report, probing first if needed
    pub async fn report(&self) -> &CapabilityReport {
        self.report
            .get_or_init(|| async {
                debug!("Probing capabilities");
                match &self.prober {
                    Some(prober) => prober.probe().await,
                    // from_report always initializes the cell
                    None => CapabilityReport::from_probes(
                        Err("capabilities were not probed".to_string()),
                        Err("capabilities were not probed".to_string()),
                    ),
                }
            })
            .await
    }

    /// Whether the first probe has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.report.initialized()
    }

    pub async fn available(&self) -> &BTreeSet<Capability> {
        self.report().await.available()
    }

    pub async fn missing(&self) -> &BTreeMap<Capability, String> {
        self.report().await.missing()
    }

    /// Whether Kuadrant is deployed, and why not
    pub async fn has_kuadrant(&self) -> (bool, String) {
        self.report().await.status(Capability::KuadrantDeployment)
    }

    /// Whether standalone Authorino and Limitador are usable, and why not
    pub async fn is_standalone(&self) -> (bool, String) {
        let report = self.report().await;
        let (authorino, reason) = report.status(Capability::AuthorinoStandalone);
        if !authorino {
            return (false, reason);
        }
        report.status(Capability::LimitadorStandalone)
    }

    /// Whether MGC is deployed, and why not
    pub async fn has_mgc(&self) -> (bool, String) {
        self.report().await.status(Capability::Mgc)
    }
}
