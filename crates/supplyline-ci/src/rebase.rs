//! Run-image rebase for an already published image.

use std::sync::Arc;
use tracing::info;

use supplyline_core::{PipelineError, Result};

use crate::runtime::{ContainerInvocation, ContainerRuntime};
use crate::stage::{PipelineStage, ToolImages};

/// Swaps the run image of a buildpack-built image for the latest one
/// published by its stack, without rebuilding the app layers.
pub struct RebaseStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    timeout_secs: u64,
}

impl RebaseStage {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, images: &ToolImages) -> Self {
        Self {
            runtime,
            image: images.rebaser.clone(),
            timeout_secs: images.timeout_secs,
        }
    }

    pub fn invocation(&self, image_reference: &str) -> ContainerInvocation {
        ContainerInvocation::new(PipelineStage::Rebase.name(), &self.image)
            .entrypoint("/cnb/lifecycle/rebaser")
            .args([image_reference])
            .timeout_secs(self.timeout_secs)
    }

    pub async fn rebase(&self, image_reference: &str) -> Result<()> {
        let image_reference = image_reference.trim();
        if image_reference.is_empty() {
            return Err(PipelineError::Config(
                "rebase requires an image reference".to_string(),
            ));
        }
        info!(image = %image_reference, "rebasing image");
        let invocation = self.invocation(image_reference);
        let output = self.runtime.run(&invocation).await?;
        if !output.success() {
            return Err(PipelineError::build_failed(
                &invocation.stage,
                output.exit_code,
                &output.stdout,
                &output.stderr,
            ));
        }
        Ok(())
    }
}
