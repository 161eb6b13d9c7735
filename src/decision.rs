//! Run / skip / fail decisions
//!
//! Tests declare [`Requirement`]s. [`decide`] turns a requirement and the
//! capability report into a [`Verdict`]; this is the only place where a
//! missing capability becomes a skip or a failure. Decide before creating
//! any resource, so a test that will not run leaves nothing behind.

use crate::capability::{Capability, CapabilityReport};
use std::fmt;

/// Reason used when performance tests are not enabled
pub const PERFORMANCE_EXCLUDED: &str = "Excluding performance tests";

/// What a test needs from the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Kuadrant operator deployment
    Kuadrant,
    /// Standalone Authorino and Limitador operators
    Standalone,
    /// Multicluster gateway controller
    Mgc,
    /// Runs only when performance tests are enabled
    Performance,
}

impl Requirement {
    /// Capabilities that must all be available
    #[must_use]
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Requirement::Kuadrant => &[Capability::KuadrantDeployment],
            Requirement::Standalone => &[
                Capability::AuthorinoStandalone,
                Capability::LimitadorStandalone,
            ],
            Requirement::Mgc => &[Capability::Mgc],
            Requirement::Performance => &[],
        }
    }

    /// Prefix of the message shown when the requirement is not met
    fn message_prefix(self) -> &'static str {
        match self {
            Requirement::Kuadrant => "Unable to locate Kuadrant installation",
            Requirement::Standalone => "Unable to run Standalone tests",
            Requirement::Mgc => "Unable to locate MGC installation",
            Requirement::Performance => "Performance test",
        }
    }
}

/// Run mode switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    /// Fail instead of skip when a capability is missing
    pub strict: bool,
    /// Run performance tests
    pub performance: bool,
}

impl RunMode {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            performance: false,
        }
    }
}

/// Outcome of a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Skip(String),
    Fail(String),
}

impl Verdict {
    #[must_use]
    pub fn is_proceed(&self) -> bool {
        matches!(self, Verdict::Proceed)
    }

    /// Reason carried by a skip or failure
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Proceed => None,
            Verdict::Skip(reason) | Verdict::Fail(reason) => Some(reason.as_str()),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Proceed => f.write_str("proceed"),
            Verdict::Skip(reason) => write!(f, "skip: {reason}"),
            Verdict::Fail(reason) => write!(f, "fail: {reason}"),
        }
    }
}

/// Decide whether a test with `requirement` runs
///
/// The reason of a skip or failure is the registry's reason, verbatim.
#[must_use]
pub fn decide(report: &CapabilityReport, requirement: Requirement, mode: RunMode) -> Verdict {
    if requirement == Requirement::Performance {
        // Not a missing capability, so strict mode leaves it a skip
        return if mode.performance {
            Verdict::Proceed
        } else {
            Verdict::Skip(PERFORMANCE_EXCLUDED.to_string())
        };
    }

    let unmet = requirement
        .capabilities()
        .iter()
        .find_map(|capability| report.reason(*capability));

    match unmet {
        None => Verdict::Proceed,
        Some(reason) if mode.strict => Verdict::Fail(reason.to_string()),
        Some(reason) => Verdict::Skip(reason.to_string()),
    }
}

/// Decide for several requirements; the first one not met wins
#[must_use]
pub fn decide_all(
    report: &CapabilityReport,
    requirements: &[Requirement],
    mode: RunMode,
) -> (Verdict, Option<Requirement>) {
    for requirement in requirements {
        let verdict = decide(report, *requirement, mode);
        if !verdict.is_proceed() {
            return (verdict, Some(*requirement));
        }
    }
    (Verdict::Proceed, None)
}

/// User-facing message for a verdict caused by `requirement`
#[must_use]
pub fn describe(requirement: Requirement, verdict: &Verdict) -> String {
    match (requirement, verdict.reason()) {
        (_, None) => verdict.to_string(),
        (Requirement::Performance, Some(reason)) => reason.to_string(),
        (requirement, Some(reason)) => format!("{}: {reason}", requirement.message_prefix()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KUADRANT_CONFIGURED;

    fn without_kuadrant(reason: &str) -> CapabilityReport {
        CapabilityReport::from_probes(Err(reason.to_string()), Err("no hub".to_string()))
    }

    #[test]
    fn test_strict_fails_with_same_reason() {
        let report = without_kuadrant("Spoke east is not connected");

        assert_eq!(
            decide(&report, Requirement::Kuadrant, RunMode::strict()),
            Verdict::Fail("Spoke east is not connected".to_string())
        );
        assert_eq!(
            decide(&report, Requirement::Kuadrant, RunMode::default()),
            Verdict::Skip("Spoke east is not connected".to_string())
        );
    }

    #[test]
    fn test_satisfied_requirement_proceeds() {
        let report = without_kuadrant("off");
        assert_eq!(
            decide(&report, Requirement::Standalone, RunMode::strict()),
            Verdict::Proceed
        );
    }

    #[test]
    fn test_standalone_requires_both() {
        let report = CapabilityReport::from_probes(Ok(()), Ok(()));
        assert_eq!(
            decide(&report, Requirement::Standalone, RunMode::default()),
            Verdict::Skip(KUADRANT_CONFIGURED.to_string())
        );
        assert_eq!(
            decide(&report, Requirement::Mgc, RunMode::default()),
            Verdict::Proceed
        );
    }

    #[test]
    fn test_performance_is_never_upgraded() {
        let report = CapabilityReport::from_probes(Ok(()), Ok(()));

        assert_eq!(
            decide(&report, Requirement::Performance, RunMode::strict()),
            Verdict::Skip(PERFORMANCE_EXCLUDED.to_string())
        );

        let mode = RunMode {
            strict: true,
            performance: true,
        };
        assert_eq!(decide(&report, Requirement::Performance, mode), Verdict::Proceed);
    }

    #[test]
    fn test_decide_all_reports_first_unmet() {
        let report = without_kuadrant("Gateway API is turned off");
        let (verdict, requirement) = decide_all(
            &report,
            &[Requirement::Standalone, Requirement::Mgc, Requirement::Kuadrant],
            RunMode::default(),
        );

        assert_eq!(verdict, Verdict::Skip("no hub".to_string()));
        assert_eq!(requirement, Some(Requirement::Mgc));

        let (verdict, requirement) = decide_all(&report, &[], RunMode::strict());
        assert_eq!(verdict, Verdict::Proceed);
        assert_eq!(requirement, None);
    }

    #[test]
    fn test_describe() {
        let verdict = Verdict::Skip("Gateway API is turned off".to_string());
        assert_eq!(
            describe(Requirement::Kuadrant, &verdict),
            "Unable to locate Kuadrant installation: Gateway API is turned off"
        );
        assert_eq!(
            describe(
                Requirement::Performance,
                &Verdict::Skip(PERFORMANCE_EXCLUDED.to_string())
            ),
            PERFORMANCE_EXCLUDED
        );
    }
}
