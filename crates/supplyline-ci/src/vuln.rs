//! Vulnerability scan of the run's SBOM.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use supplyline_core::{tool_output, PipelineError, Result};

use crate::runtime::{ContainerInvocation, ContainerRuntime, Mount};
use crate::sbom::SbomArtifact;
use crate::stage::{PipelineStage, ToolImages, OUTPUT_MOUNT};
use crate::upload::ArtifactUpload;
use crate::workspace::{copy_tree, RunWorkspace, VULN_FILE};

/// Container path of the read-only SBOM input.
pub const SBOM_INPUT: &str = "/work/sbom.json";

/// Scanner output for one SBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnReport {
    pub path: PathBuf,
    pub sbom_path: PathBuf,
    pub uploaded_key: Option<String>,
}

/// Runs the vulnerability scanner over an SBOM document.
pub struct VulnScanStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    timeout_secs: u64,
}

impl VulnScanStage {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, images: &ToolImages) -> Self {
        Self {
            runtime,
            image: images.grype.clone(),
            timeout_secs: images.timeout_secs,
        }
    }

    /// Invocation scanning `sbom_path`, writing `vuln.json` into `out_dir`.
    pub fn invocation(&self, sbom_path: &Path, out_dir: &Path) -> ContainerInvocation {
        ContainerInvocation::new(PipelineStage::Scan.name(), &self.image)
            .args([
                format!("sbom:{SBOM_INPUT}"),
                "-o".to_string(),
                "json".to_string(),
                "--file".to_string(),
                VULN_FILE.to_string(),
            ])
            .mount(Mount::read_only(sbom_path, SBOM_INPUT))
            .mount(Mount::read_write(out_dir, OUTPUT_MOUNT))
            .workdir(OUTPUT_MOUNT)
            .timeout_secs(self.timeout_secs)
    }

    /// Scan `sbom`, store the report under `artifacts/`, and upload it when
    /// `upload` is set.
    pub async fn scan(
        &self,
        sbom: &SbomArtifact,
        upload: Option<&ArtifactUpload>,
        workspace: &RunWorkspace,
    ) -> Result<VulnReport> {
        if !sbom.path.is_file() {
            return Err(PipelineError::Scan(format!(
                "sbom {} does not exist",
                sbom.path.display()
            )));
        }
        let out_dir = workspace.stage_dir(PipelineStage::Scan.name())?;
        let invocation = self.invocation(&sbom.path, &out_dir);

        info!(image = %sbom.image_reference, "scanning sbom");
        let output = self.runtime.run(&invocation).await?;
        if !output.success() {
            return Err(PipelineError::Scan(format!(
                "{} exited with code {}:\n{}",
                self.image,
                output.exit_code,
                tool_output(&output.stdout, &output.stderr)
            )));
        }
        if !out_dir.join(VULN_FILE).is_file() {
            return Err(PipelineError::Scan(format!(
                "{} exited successfully but wrote no {VULN_FILE}",
                self.image
            )));
        }

        copy_tree(&out_dir, &workspace.artifacts_dir(), &[])?;
        let path = workspace.vuln_path();

        let uploaded_key = match upload {
            Some(upload) => Some(
                upload
                    .put_file(VULN_FILE, &path)
                    .await
                    .map_err(|e| PipelineError::Scan(format!("upload failed: {e}")))?,
            ),
            None => None,
        };

        Ok(VulnReport {
            path,
            sbom_path: sbom.path.clone(),
            uploaded_key,
        })
    }
}
