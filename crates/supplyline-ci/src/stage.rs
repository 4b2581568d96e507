//! Pipeline stages and the tool images each one runs.

use serde::{Deserialize, Serialize};

/// Default buildpack builder.
pub const DEFAULT_BUILDER_IMAGE: &str = "paketobuildpacks/builder:base";
/// Default ko image.
pub const DEFAULT_KO_IMAGE: &str = "cgr.dev/chainguard/ko:latest";
/// SBOM generator image.
pub const DEFAULT_SYFT_IMAGE: &str = "anchore/syft:latest";
/// Vulnerability scanner image.
pub const DEFAULT_GRYPE_IMAGE: &str = "anchore/grype:latest";
/// Image providing `/cnb/lifecycle/rebaser`.
pub const DEFAULT_REBASER_IMAGE: &str = "paketobuildpacks/builder:base";

/// Container path where report tools write their output.
pub const OUTPUT_MOUNT: &str = "/out";

/// Stages of a run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Clone and pin the source ref.
    Checkout,

    /// Build and push the image.
    Build,

    /// Generate the SPDX SBOM.
    Sbom,

    /// Scan the SBOM for vulnerabilities.
    Scan,

    /// Tally findings by severity.
    Summarize,

    /// Refresh the run image of an existing image.
    Rebase,
}

impl PipelineStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Checkout => "checkout",
            PipelineStage::Build => "build",
            PipelineStage::Sbom => "sbom",
            PipelineStage::Scan => "scan",
            PipelineStage::Summarize => "summarize",
            PipelineStage::Rebase => "rebase",
        }
    }
}

/// Container images for every tool the pipeline runs, plus the per-invocation
/// timeout applied to each of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolImages {
    pub builder: String,
    pub ko: String,
    pub syft: String,
    pub grype: String,
    pub rebaser: String,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ToolImages {
    fn default() -> Self {
        Self {
            builder: DEFAULT_BUILDER_IMAGE.to_string(),
            ko: DEFAULT_KO_IMAGE.to_string(),
            syft: DEFAULT_SYFT_IMAGE.to_string(),
            grype: DEFAULT_GRYPE_IMAGE.to_string(),
            rebaser: DEFAULT_REBASER_IMAGE.to_string(),
            timeout_secs: 0,
        }
    }
}

impl ToolImages {
    /// Override the builder image; empty keeps the default.
    pub fn with_builder(mut self, builder: &str) -> Self {
        if !builder.trim().is_empty() {
            self.builder = builder.trim().to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
