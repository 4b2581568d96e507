//! Pipeline error taxonomy.
//!
//! Every variant is fatal for the run that produced it: stages never retry and
//! never continue past a failure.

use std::path::PathBuf;

/// Errors produced by any stage of a supplyline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "no usable ref in {repository}: requested branch {branch:?}, tag {tag:?}, and neither main nor master exists"
    )]
    RefNotFound {
        repository: String,
        branch: Option<String>,
        tag: Option<String>,
    },

    #[error("authentication failed for {repository}: {reason}")]
    Authentication { repository: String, reason: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("{stage} failed with exit code {exit_code}:\n{output}")]
    Build {
        stage: String,
        exit_code: i32,
        output: String,
    },

    #[error("sbom generation failed: {0}")]
    Sbom(String),

    #[error("vulnerability scan failed: {0}")]
    Scan(String),

    #[error("cannot parse vulnerability report {path}: {reason}")]
    ReportParse { path: PathBuf, reason: String },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage}: container runtime error: {reason}")]
    Runtime { stage: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Name of the pipeline stage the error belongs to, for operator output.
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::RefNotFound { .. }
            | PipelineError::Authentication { .. }
            | PipelineError::Git(_) => "checkout",
            PipelineError::Build { stage, .. } | PipelineError::Runtime { stage, .. } => stage,
            PipelineError::Sbom(_) => "sbom",
            PipelineError::Scan(_) => "scan",
            PipelineError::ReportParse { .. } => "summarize",
            PipelineError::Workspace(_) | PipelineError::Config(_) => "setup",
            PipelineError::Serialization(_) | PipelineError::Io(_) => "io",
        }
    }

    /// Build failure for a tool invocation that exited non-zero.
    pub fn build_failed(stage: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        PipelineError::Build {
            stage: stage.to_string(),
            exit_code,
            output: tool_output(stdout, stderr),
        }
    }

    /// The container for `stage` could not be started or waited on.
    pub fn runtime(stage: &str, reason: impl Into<String>) -> Self {
        PipelineError::Runtime {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}

/// A tool's stdout followed by its stderr, trailing whitespace trimmed.
pub fn tool_output(stdout: &str, stderr: &str) -> String {
    let mut output = String::new();
    if !stdout.trim().is_empty() {
        output.push_str(stdout.trim_end());
        output.push('\n');
    }
    output.push_str(stderr.trim_end());
    output
}

/// Result type for supplyline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_not_found_display() {
        let err = PipelineError::RefNotFound {
            repository: "https://example.com/acme/app".to_string(),
            branch: None,
            tag: Some("v9".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("acme/app"));
        assert!(msg.contains("v9"));
        assert_eq!(err.stage(), "checkout");
    }

    #[test]
    fn test_build_failed_keeps_tool_output() {
        let err = PipelineError::build_failed("build:ko", 2, "step 1\n", "push denied\n");
        match &err {
            PipelineError::Build {
                stage,
                exit_code,
                output,
            } => {
                assert_eq!(stage, "build:ko");
                assert_eq!(*exit_code, 2);
                assert_eq!(output, "step 1\npush denied");
            }
            other => panic!("expected Build, got {other:?}"),
        }
        assert_eq!(err.stage(), "build:ko");
    }

    #[test]
    fn test_runtime_error_names_its_stage() {
        let err = PipelineError::runtime("build:buildpack", "cannot start docker: not found");
        assert_eq!(err.stage(), "build:buildpack");
        assert!(err.to_string().starts_with("build:buildpack: container runtime error"));
    }

    #[test]
    fn test_tool_output_without_stdout() {
        assert_eq!(tool_output("  \n", "boom\n"), "boom");
        assert_eq!(tool_output("line\n", ""), "line\n");
    }

    #[test]
    fn test_report_parse_display() {
        let err = PipelineError::ReportParse {
            path: PathBuf::from("artifacts/vuln.json"),
            reason: "missing field `matches`".to_string(),
        };
        assert!(err.to_string().contains("artifacts/vuln.json"));
        assert_eq!(err.stage(), "summarize");
    }
}
