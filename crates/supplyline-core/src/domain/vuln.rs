//! Vulnerability findings and their per-severity tally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One vulnerability matched against a package in the SBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    pub id: String,
    pub severity: String,
    pub fix_versions: Vec<String>,
}

impl VulnerabilityFinding {
    pub fn new(id: impl Into<String>, severity: impl Into<String>, fix_versions: Vec<String>) -> Self {
        Self {
            id: id.into(),
            severity: severity.into(),
            fix_versions,
        }
    }

    pub fn is_fixable(&self) -> bool {
        !self.fix_versions.is_empty()
    }
}

/// Finding counts keyed by the scanner's literal severity label.
///
/// Labels are not normalized: `"High"` and `"high"` are distinct keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityTally {
    pub counts: HashMap<String, usize>,
    pub fixable_count: usize,
}

impl SeverityTally {
    /// Tally findings, discarding placeholder entries with an empty id.
    pub fn from_findings<'a, I>(findings: I) -> Self
    where
        I: IntoIterator<Item = &'a VulnerabilityFinding>,
    {
        let mut tally = SeverityTally::default();
        for finding in findings {
            if finding.id.is_empty() {
                continue;
            }
            *tally.counts.entry(finding.severity.clone()).or_insert(0) += 1;
            if finding.is_fixable() {
                tally.fixable_count += 1;
            }
        }
        tally
    }

    pub fn count(&self, severity: &str) -> usize {
        self.counts.get(severity).copied().unwrap_or(0)
    }

    /// Number of real findings tallied.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Entries sorted by label, for stable output.
    pub fn sorted(&self) -> Vec<(&str, usize)> {
        let mut entries: Vec<(&str, usize)> = self
            .counts
            .iter()
            .map(|(label, count)| (label.as_str(), *count))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
