//! Domain models for supplyline.
//!
//! - `SourceRef` / `ResolvedCheckout`: what to build and the commit it pins to
//! - `RegistryFields` / `RegistryTarget` / `ImageCoordinate` / `BuiltImage`: where the image goes
//! - `VulnerabilityFinding` / `SeverityTally`: what the scan found

pub mod error;
pub mod registry;
pub mod source;
pub mod vuln;

pub use error::{tool_output, PipelineError, Result};
pub use registry::{
    BuildTool, BuiltImage, ImageCoordinate, RegistryFields, RegistryTarget, EPHEMERAL_REGISTRY,
    EPHEMERAL_TAG,
};
pub use source::{RefKind, ResolvedCheckout, SourceRef};
pub use vuln::{SeverityTally, VulnerabilityFinding};
