//! SPDX SBOM generation for a built image.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use supplyline_core::{tool_output, BuiltImage, PipelineError, Result};

use crate::runtime::{ContainerInvocation, ContainerRuntime, Mount};
use crate::stage::{PipelineStage, ToolImages, OUTPUT_MOUNT};
use crate::upload::ArtifactUpload;
use crate::workspace::{copy_tree, RunWorkspace, SBOM_FILE};

/// Namespace written when a creator is set but no namespace is.
pub const DEFAULT_SBOM_NAMESPACE: &str = "https://example.com/spdx.json";

/// Optional provenance rewrite applied to the generated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbomOptions {
    /// When set, replaces `creationInfo.creators` with `["Tool: <creator>"]`.
    pub creator: Option<String>,
    /// `documentNamespace` written together with the creator.
    pub namespace: String,
}

impl Default for SbomOptions {
    fn default() -> Self {
        Self {
            creator: None,
            namespace: DEFAULT_SBOM_NAMESPACE.to_string(),
        }
    }
}

impl SbomOptions {
    /// Options from operator input; empty strings mean unset.
    pub fn new(creator: Option<&str>, namespace: Option<&str>) -> Self {
        let creator = creator
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let namespace = namespace
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SBOM_NAMESPACE)
            .to_string();
        Self { creator, namespace }
    }
}

/// The run's single SBOM document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbomArtifact {
    pub path: PathBuf,
    pub image_reference: String,
    pub uploaded_key: Option<String>,
}

/// Runs the SBOM generator against a pushed image.
pub struct SbomStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    timeout_secs: u64,
    options: SbomOptions,
}

impl SbomStage {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, images: &ToolImages, options: SbomOptions) -> Self {
        Self {
            runtime,
            image: images.syft.clone(),
            timeout_secs: images.timeout_secs,
            options,
        }
    }

    /// Invocation producing `sbom.json` in `out_dir`.
    pub fn invocation(&self, image_reference: &str, out_dir: &Path) -> ContainerInvocation {
        ContainerInvocation::new(PipelineStage::Sbom.name(), &self.image)
            .args([
                image_reference,
                "--scope",
                "all-layers",
                "-o",
                "spdx-json",
                "--file",
                SBOM_FILE,
            ])
            .mount(Mount::read_write(out_dir, OUTPUT_MOUNT))
            .workdir(OUTPUT_MOUNT)
            .timeout_secs(self.timeout_secs)
    }

    /// Generate the SBOM for `image`, store it under `artifacts/`, and upload
    /// it when `upload` is set. Any failure, including the upload, is fatal.
    pub async fn generate(
        &self,
        image: &BuiltImage,
        upload: Option<&ArtifactUpload>,
        workspace: &RunWorkspace,
    ) -> Result<SbomArtifact> {
        let out_dir = workspace.stage_dir(PipelineStage::Sbom.name())?;
        let image_reference = image.reference();
        let invocation = self.invocation(&image_reference, &out_dir);

        info!(image = %image_reference, "generating sbom");
        let output = self.runtime.run(&invocation).await?;
        if !output.success() {
            return Err(PipelineError::Sbom(format!(
                "{} exited with code {}:\n{}",
                self.image,
                output.exit_code,
                tool_output(&output.stdout, &output.stderr)
            )));
        }

        let produced = out_dir.join(SBOM_FILE);
        if !produced.is_file() {
            return Err(PipelineError::Sbom(format!(
                "{} exited successfully but wrote no {SBOM_FILE}",
                self.image
            )));
        }
        if let Some(creator) = &self.options.creator {
            rewrite_provenance(&produced, creator, &self.options.namespace)?;
        }

        copy_tree(&out_dir, &workspace.artifacts_dir(), &[])?;
        let path = workspace.sbom_path();
        debug!(path = %path.display(), "sbom stored");

        let uploaded_key = match upload {
            Some(upload) => Some(
                upload
                    .put_file(SBOM_FILE, &path)
                    .await
                    .map_err(|e| PipelineError::Sbom(format!("upload failed: {e}")))?,
            ),
            None => None,
        };

        Ok(SbomArtifact {
            path,
            image_reference,
            uploaded_key,
        })
    }
}

/// Replace `creationInfo.creators` and `documentNamespace`, leaving every
/// other field of the document as generated.
pub fn rewrite_provenance(path: &Path, creator: &str, namespace: &str) -> Result<()> {
    let mut doc: Value = serde_json::from_slice(&fs::read(path)?)
        .map_err(|e| PipelineError::Sbom(format!("generated sbom is not valid JSON: {e}")))?;
    let root = doc
        .as_object_mut()
        .ok_or_else(|| PipelineError::Sbom("generated sbom is not a JSON object".to_string()))?;

    let creation_info = root
        .entry("creationInfo")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| PipelineError::Sbom("creationInfo is not a JSON object".to_string()))?;
    creation_info.insert("creators".to_string(), json!([format!("Tool: {creator}")]));
    root.insert("documentNamespace".to_string(), json!(namespace));

    fs::write(path, serde_json::to_vec_pretty(&doc)?)?;
    Ok(())
}
