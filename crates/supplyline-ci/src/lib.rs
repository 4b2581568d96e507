//! supplyline CI - source to scanned image
//!
//! Provides the pipeline orchestrator that:
//! - Builds a pinned checkout with ko or Cloud Native Buildpacks
//! - Generates an SPDX SBOM for the pushed image
//! - Scans the SBOM and tallies findings by severity
//! - Optionally uploads both reports to object storage

pub mod build;
pub mod fakes;
pub mod pipeline;
pub mod rebase;
pub mod runtime;
pub mod sbom;
pub mod stage;
pub mod upload;
pub mod vuln;
pub mod workspace;

// Re-export key types
pub use build::{BuildDispatcher, BuildStrategy, BuildpackStrategy, KoStrategy, RegistryPlan};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineOutcome, RebaseOutcome, RunMode, StageTiming,
};
pub use rebase::RebaseStage;
pub use runtime::{ContainerInvocation, ContainerRuntime, DockerRuntime, Mount, ToolOutput};
pub use sbom::{SbomArtifact, SbomOptions, SbomStage, DEFAULT_SBOM_NAMESPACE};
pub use stage::{PipelineStage, ToolImages};
pub use upload::ArtifactUpload;
pub use vuln::{VulnReport, VulnScanStage};
pub use workspace::RunWorkspace;
