//! supplyline core library
//!
//! Domain model and the decision logic of the pipeline: which commit to
//! build, what registry credentials to hand the builder, and how scanner
//! findings reduce to a severity tally.

pub mod credentials;
pub mod domain;
pub mod git;
pub mod obs;
pub mod report;
pub mod resolver;
pub mod telemetry;

pub use credentials::{assemble, AuthEntry, DockerConfig};
pub use domain::{
    tool_output, BuildTool, BuiltImage, ImageCoordinate, PipelineError, RefKind, RegistryFields,
    RegistryTarget, ResolvedCheckout, Result, SeverityTally, SourceRef, VulnerabilityFinding,
    EPHEMERAL_REGISTRY, EPHEMERAL_TAG,
};
pub use git::{GitCredentials, RefListing, GIT_TOKEN_ENV};
pub use obs::{
    emit_run_finished, emit_run_started, emit_stage_failed, emit_stage_finished,
    emit_stage_started, run_span,
};
pub use report::{parse_findings, parse_report};
pub use resolver::{select_ref, RefResolver, SelectedRef};
pub use telemetry::init_tracing;

/// supplyline version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
