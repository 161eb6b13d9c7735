//! Capabilities of the environment under test
//!
//! A capability is a fact about what is deployed, discovered once per run.
//! [`CapabilityReport`] partitions the closed set [`Capability::ALL`] into
//! available and missing capabilities; every capability is in exactly one of
//! the two collections.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reason attached to the standalone capabilities when Kuadrant is deployed
pub const KUADRANT_CONFIGURED: &str = "integrated control plane is configured and enabled";

/// Deployment capabilities the harness can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Authorino and Limitador are managed by the Kuadrant operator
    KuadrantDeployment,
    /// Authorino is deployed through authorino-operator
    AuthorinoStandalone,
    /// Limitador is deployed through limitador-operator
    LimitadorStandalone,
    /// Multicluster gateway controller is deployed
    Mgc,
}

impl Capability {
    /// Every capability, in report order
    pub const ALL: [Capability; 4] = [
        Capability::KuadrantDeployment,
        Capability::AuthorinoStandalone,
        Capability::LimitadorStandalone,
        Capability::Mgc,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::KuadrantDeployment => "kuadrant-deployment",
            Capability::AuthorinoStandalone => "authorino-standalone",
            Capability::LimitadorStandalone => "limitador-standalone",
            Capability::Mgc => "mgc",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one probe: which capabilities exist and why the others do not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityReport {
    available: BTreeSet<Capability>,
    missing: BTreeMap<Capability, String>,
}

impl CapabilityReport {
    /// Derive the full report from the two independent probe outcomes
    ///
    /// The standalone capabilities are never probed: they are present exactly
    /// when the Kuadrant deployment is absent.
    #[must_use]
    pub fn from_probes(kuadrant: Result<(), String>, mgc: Result<(), String>) -> Self {
        let mut report = Self {
            available: BTreeSet::new(),
            missing: BTreeMap::new(),
        };

        for capability in Capability::ALL {
            let outcome = match capability {
                Capability::KuadrantDeployment => kuadrant.clone(),
                Capability::AuthorinoStandalone | Capability::LimitadorStandalone => {
                    if kuadrant.is_ok() {
                        Err(KUADRANT_CONFIGURED.to_string())
                    } else {
                        Ok(())
                    }
                }
                Capability::Mgc => mgc.clone(),
            };

            match outcome {
                Ok(()) => {
                    report.available.insert(capability);
                }
                Err(reason) => {
                    report.missing.insert(capability, reason);
                }
            }
        }

        report
    }

    #[must_use]
    pub fn available(&self) -> &BTreeSet<Capability> {
        &self.available
    }

    #[must_use]
    pub fn missing(&self) -> &BTreeMap<Capability, String> {
        &self.missing
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.available.contains(&capability)
    }

    /// Why a capability is missing, `None` if it is available
    #[must_use]
    pub fn reason(&self, capability: Capability) -> Option<&str> {
        self.missing.get(&capability).map(String::as_str)
    }

    /// `(present, reason)` pair; the reason is empty when present
    #[must_use]
    pub fn status(&self, capability: Capability) -> (bool, String) {
        match self.reason(capability) {
            Some(reason) => (false, reason.to_string()),
            None => (true, String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(report: &CapabilityReport) {
        for capability in Capability::ALL {
            let available = report.available().contains(&capability);
            let missing = report.missing().contains_key(&capability);
            assert!(
                available ^ missing,
                "{capability} must be in exactly one collection"
            );
        }
        assert_eq!(
            report.available().len() + report.missing().len(),
            Capability::ALL.len()
        );
    }

    #[test]
    fn test_partition_for_every_outcome() {
        let outcomes = [Ok(()), Err("nope".to_string())];
        for kuadrant in &outcomes {
            for mgc in &outcomes {
                let report = CapabilityReport::from_probes(kuadrant.clone(), mgc.clone());
                assert_partition(&report);
            }
        }
    }

    #[test]
    fn test_kuadrant_excludes_standalone() {
        let report = CapabilityReport::from_probes(Ok(()), Err("no mgc".into()));

        assert!(report.has(Capability::KuadrantDeployment));
        assert_eq!(
            report.reason(Capability::AuthorinoStandalone),
            Some("integrated control plane is configured and enabled")
        );
        assert_eq!(
            report.reason(Capability::LimitadorStandalone),
            Some(KUADRANT_CONFIGURED)
        );
        assert_eq!(report.reason(Capability::Mgc), Some("no mgc"));
    }

    #[test]
    fn test_missing_kuadrant_implies_standalone() {
        let report =
            CapabilityReport::from_probes(Err("Gateway API is turned off".into()), Ok(()));

        assert!(report.has(Capability::AuthorinoStandalone));
        assert!(report.has(Capability::LimitadorStandalone));
        assert!(report.has(Capability::Mgc));
        assert_eq!(
            report.status(Capability::KuadrantDeployment),
            (false, "Gateway API is turned off".to_string())
        );
        assert_eq!(report.status(Capability::Mgc), (true, String::new()));
    }
}
