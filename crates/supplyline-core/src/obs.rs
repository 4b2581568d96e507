//! Structured observability hooks for the pipeline run lifecycle.
//!
//! - Run-scoped tracing span via [`run_span`]
//! - Emitters for run start/finish and stage start/finish
//!
//! Events are emitted at `info!` level with an `event` field so log pipelines
//! can filter on it.

use tracing::{info, warn};

/// Run-scoped span; attach it to the run future with `Instrument::instrument`
/// so every event logged by any stage carries the run id.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("supplyline.run", run_id = %run_id)
}

/// Emit event: run started for a repository.
pub fn emit_run_started(run_id: &str, repository: &str) {
    info!(event = "run.started", run_id = %run_id, repository = %repository);
}

/// Emit event: a stage began.
pub fn emit_stage_started(run_id: &str, stage: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

/// Emit event: a stage completed successfully.
pub fn emit_stage_finished(run_id: &str, stage: &str, duration_ms: u64) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        duration_ms = duration_ms,
    );
}

/// Emit event: a stage failed and the run is aborting.
pub fn emit_stage_failed(run_id: &str, stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", run_id = %run_id, stage = %stage, error = %error);
}

/// Emit event: run finished with duration and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}
