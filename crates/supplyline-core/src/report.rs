//! Vulnerability report parsing and severity aggregation.
//!
//! Reads the scanner's JSON document (`{"matches": [{"vulnerability": {...}}]}`)
//! and reduces it to a [`SeverityTally`].

use serde::{Deserialize, Deserializer};
use std::path::Path;

use crate::domain::error::{PipelineError, Result};
use crate::domain::vuln::{SeverityTally, VulnerabilityFinding};

#[derive(Debug, Deserialize)]
struct ReportDocument {
    /// Required, but `null` reads as no matches.
    #[serde(deserialize_with = "null_as_empty")]
    matches: Vec<ReportMatch>,
}

#[derive(Debug, Deserialize)]
struct ReportMatch {
    vulnerability: ReportVulnerability,
}

#[derive(Debug, Deserialize)]
struct ReportVulnerability {
    #[serde(default)]
    id: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    fix: Option<ReportFix>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportFix {
    #[serde(default, deserialize_with = "null_as_empty")]
    versions: Vec<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse report bytes into findings, dropping placeholder matches with no id.
pub fn parse_findings(bytes: &[u8]) -> serde_json::Result<Vec<VulnerabilityFinding>> {
    let doc: ReportDocument = serde_json::from_slice(bytes)?;
    Ok(doc
        .matches
        .into_iter()
        .map(|m| m.vulnerability)
        .filter(|v| !v.id.is_empty())
        .map(|v| VulnerabilityFinding {
            id: v.id,
            severity: v.severity,
            fix_versions: v.fix.unwrap_or_default().versions,
        })
        .collect())
}

/// Read the report at `path` and tally findings by severity.
pub fn parse_report(path: &Path) -> Result<SeverityTally> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::ReportParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let findings = parse_findings(&bytes).map_err(|e| PipelineError::ReportParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(SeverityTally::from_findings(&findings))
}
