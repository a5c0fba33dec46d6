//! Findings and their rendering.

use serde::Serialize;
use std::fmt;

/// The five conformance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Check {
    /// Every class has target objects with advertised devices
    ClassesAdvertised,
    /// Every tagged device names an existing target object
    DevicesReferenceTargets,
    /// Every allocation result points at an advertised device
    AllocationsAdvertised,
    /// Every claim status entry resolves, and projections agree
    ClaimStatusResolvable,
    /// Every PodNetwork is admissible and its Ready condition is current
    PodNetworksReady,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Check::ClassesAdvertised => "classes-advertised",
            Check::DevicesReferenceTargets => "devices-reference-targets",
            Check::AllocationsAdvertised => "allocations-advertised",
            Check::ClaimStatusResolvable => "claim-status-resolvable",
            Check::PodNetworksReady => "pod-networks-ready",
        };
        f.write_str(s)
    }
}

/// How bad a finding is. Any error fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Contract violation
    Error,
    /// Suspicious but allowed, e.g. not yet reconciled
    Warning,
}

/// One observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Check that produced it
    pub check: Check,
    /// Severity
    pub severity: Severity,
    /// Object the finding is about
    pub object: String,
    /// Explanation
    pub message: String,
}

/// Result of a conformance run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Findings in check order
    pub findings: Vec<Finding>,
}

impl Report {
    pub(crate) fn error(&mut self, check: Check, object: impl Into<String>, message: impl Into<String>) {
        self.push(check, Severity::Error, object.into(), message.into());
    }

    pub(crate) fn warning(&mut self, check: Check, object: impl Into<String>, message: impl Into<String>) {
        self.push(check, Severity::Warning, object.into(), message.into());
    }

    fn push(&mut self, check: Check, severity: Severity, object: String, message: String) {
        self.findings.push(Finding {
            check,
            severity,
            object,
            message,
        });
    }

    /// Number of findings with the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Whether the run failed.
    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    /// Findings of one check.
    pub fn of(&self, check: Check) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.check == check)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for finding in &self.findings {
            let severity = match finding.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN ",
            };
            writeln!(f, "{severity} [{}] {}: {}", finding.check, finding.object, finding.message)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.count(Severity::Error),
            self.count(Severity::Warning)
        )
    }
}
