//! Pipeline orchestration: checkout, build, SBOM, scan, summary.
//!
//! Stages run strictly in sequence and the first failure aborts the run. The
//! run workspace is dropped on every exit path, so the source tree and scratch
//! output never outlive the run. Dropping a run future mid-stage kills the git
//! process or container in flight before the workspace is cleaned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};
use uuid::Uuid;

use supplyline_core::{
    emit_run_finished, emit_run_started, emit_stage_failed, emit_stage_finished,
    emit_stage_started, parse_report, run_span, BuildTool, BuiltImage, GitCredentials,
    PipelineError, RefResolver, RegistryFields, ResolvedCheckout, Result, SeverityTally,
    SourceRef,
};
use supplyline_store::{ObjectStore, S3ObjectStore};

use crate::build::{BuildDispatcher, RegistryPlan};
use crate::rebase::RebaseStage;
use crate::runtime::ContainerRuntime;
use crate::sbom::{SbomArtifact, SbomOptions, SbomStage};
use crate::stage::{PipelineStage, ToolImages};
use crate::upload::ArtifactUpload;
use crate::vuln::{VulnReport, VulnScanStage};
use crate::workspace::RunWorkspace;

/// Where a run stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Checkout through summary.
    #[default]
    Full,
    /// Checkout and build only.
    BuildOnly,
}

impl RunMode {
    /// Whether runs in this mode upload artifacts.
    pub fn uploads(&self) -> bool {
        matches!(self, RunMode::Full)
    }
}

/// Everything a run needs besides secrets and the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub repository_url: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub build_tool: BuildTool,
    pub registry: RegistryFields,
    /// Bucket receiving `sbom.json` and `vuln.json`.
    pub bucket: Option<String>,
    pub sbom: SbomOptions,
    pub images: ToolImages,
    /// Run workspace root; `artifacts/` under it survives the run.
    pub workdir: PathBuf,
    pub mode: RunMode,
}

impl PipelineConfig {
    pub fn new(repository_url: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            repository_url: repository_url.into(),
            branch: None,
            tag: None,
            build_tool: BuildTool::default(),
            registry: RegistryFields::default(),
            bucket: None,
            sbom: SbomOptions::default(),
            images: ToolImages::default(),
            workdir: workdir.into(),
            mode: RunMode::default(),
        }
    }

    pub fn source(&self) -> SourceRef {
        SourceRef::new(
            self.repository_url.trim(),
            self.branch.clone(),
            self.tag.clone(),
        )
    }

    /// Configured bucket, ignoring an empty value.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository_url.trim().is_empty() {
            return Err(PipelineError::Config(
                "a git repository URL is required".to_string(),
            ));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err(PipelineError::Config("workdir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub duration_ms: u64,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checkout: ResolvedCheckout,
    pub image: BuiltImage,
    /// Absent in build-only mode.
    pub sbom: Option<SbomArtifact>,
    pub vuln_report: Option<VulnReport>,
    pub tally: Option<SeverityTally>,
    pub stages: Vec<StageTiming>,
}

/// Result of a rebase-only run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseOutcome {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub image_reference: String,
}

/// Supply-chain pipeline orchestrator.
pub struct Pipeline {
    config: PipelineConfig,
    runtime: Arc<dyn ContainerRuntime>,
    credentials: GitCredentials,
    store: Option<Arc<dyn ObjectStore>>,
}

impl Pipeline {
    /// Pipeline without an object store. Runs with a bucket configured fail
    /// until one is attached with [`Pipeline::with_object_store`].
    pub fn new(
        config: PipelineConfig,
        runtime: Arc<dyn ContainerRuntime>,
        credentials: GitCredentials,
    ) -> Self {
        Self {
            config,
            runtime,
            credentials,
            store: None,
        }
    }

    /// Pipeline whose object store, if a bucket is configured and the mode
    /// uploads, is built from the S3 credentials in the environment. They are
    /// read once, here.
    pub async fn connect(
        config: PipelineConfig,
        runtime: Arc<dyn ContainerRuntime>,
        credentials: GitCredentials,
    ) -> Result<Self> {
        let needs_store = config.mode.uploads() && config.bucket().is_some();
        let mut pipeline = Self::new(config, runtime, credentials);
        if needs_store {
            let store = S3ObjectStore::from_env()
                .await
                .map_err(|e| PipelineError::Config(e.to_string()))?;
            pipeline = pipeline.with_object_store(Arc::new(store));
        }
        Ok(pipeline)
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn upload(&self) -> Result<Option<ArtifactUpload>> {
        if !self.config.mode.uploads() {
            return Ok(None);
        }
        match (self.config.bucket(), &self.store) {
            (None, _) => Ok(None),
            (Some(bucket), Some(store)) => Ok(Some(ArtifactUpload::new(store.clone(), bucket))),
            (Some(bucket), None) => Err(PipelineError::Config(format!(
                "bucket {bucket} is configured but no object store credentials are available"
            ))),
        }
    }

    /// Execute one run.
    pub async fn run(&self) -> Result<PipelineOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let result = self
            .execute(&run_id, started_at, start)
            .instrument(run_span(&run_id))
            .await;

        emit_run_finished(&run_id, elapsed_ms(start), result.is_ok());
        result
    }

    async fn execute(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> Result<PipelineOutcome> {
        let source = self.config.source();
        emit_run_started(run_id, &source.repository_url);

        self.config.validate()?;
        let upload = self.upload()?;
        let workspace = RunWorkspace::create(&self.config.workdir)?;
        let mut stages = Vec::new();

        let resolver = RefResolver::new(self.credentials.clone());
        let tree = workspace.src_dir();
        let checkout = timed(
            run_id,
            PipelineStage::Checkout,
            &mut stages,
            resolver.resolve(&source, &tree),
        )
        .await?;
        info!(
            ref_name = %checkout.ref_name,
            ref_kind = %checkout.ref_kind,
            commit = %checkout.commit_hash,
            "source pinned"
        );

        let plan = RegistryPlan::from_fields(&self.config.registry, &source.repo_base_name());
        let dispatcher =
            BuildDispatcher::new(self.runtime.clone(), self.config.build_tool, &self.config.images);
        let image = timed(
            run_id,
            PipelineStage::Build,
            &mut stages,
            dispatcher.build(&checkout, &plan, &workspace),
        )
        .await?;
        info!(image = %image.reference(), ephemeral = image.ephemeral, "image pushed");

        if self.config.mode == RunMode::BuildOnly {
            return Ok(PipelineOutcome {
                run_id: run_id.to_string(),
                started_at,
                duration_ms: elapsed_ms(start),
                checkout,
                image,
                sbom: None,
                vuln_report: None,
                tally: None,
                stages,
            });
        }

        let sbom_stage = SbomStage::new(
            self.runtime.clone(),
            &self.config.images,
            self.config.sbom.clone(),
        );
        let sbom = timed(
            run_id,
            PipelineStage::Sbom,
            &mut stages,
            sbom_stage.generate(&image, upload.as_ref(), &workspace),
        )
        .await?;

        let scan_stage = VulnScanStage::new(self.runtime.clone(), &self.config.images);
        let report = timed(
            run_id,
            PipelineStage::Scan,
            &mut stages,
            scan_stage.scan(&sbom, upload.as_ref(), &workspace),
        )
        .await?;

        let tally = timed(run_id, PipelineStage::Summarize, &mut stages, async {
            parse_report(&report.path)
        })
        .await?;
        info!(
            findings = tally.total(),
            fixable = tally.fixable_count,
            "scan summarized"
        );

        Ok(PipelineOutcome {
            run_id: run_id.to_string(),
            started_at,
            duration_ms: elapsed_ms(start),
            checkout,
            image,
            sbom: Some(sbom),
            vuln_report: Some(report),
            tally: Some(tally),
            stages,
        })
    }

    /// Refresh the run image of an existing image. No checkout, workspace or
    /// upload is involved.
    pub async fn rebase(&self, image_reference: &str) -> Result<RebaseOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let stage = RebaseStage::new(self.runtime.clone(), &self.config.images);

        let result = async {
            emit_run_started(&run_id, image_reference);
            let mut stages = Vec::new();
            timed(
                &run_id,
                PipelineStage::Rebase,
                &mut stages,
                stage.rebase(image_reference),
            )
            .await
        }
        .instrument(run_span(&run_id))
        .await;

        emit_run_finished(&run_id, elapsed_ms(start), result.is_ok());
        result?;
        Ok(RebaseOutcome {
            run_id,
            started_at,
            duration_ms: elapsed_ms(start),
            image_reference: image_reference.trim().to_string(),
        })
    }
}

/// Run one stage, emitting lifecycle events and recording its duration.
async fn timed<T, F>(
    run_id: &str,
    stage: PipelineStage,
    timings: &mut Vec<StageTiming>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    emit_stage_started(run_id, stage.name());
    let start = Instant::now();
    match fut.await {
        Ok(value) => {
            let duration_ms = elapsed_ms(start);
            emit_stage_finished(run_id, stage.name(), duration_ms);
            timings.push(StageTiming { stage, duration_ms });
            Ok(value)
        }
        Err(e) => {
            emit_stage_failed(run_id, stage.name(), &e);
            Err(e)
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
