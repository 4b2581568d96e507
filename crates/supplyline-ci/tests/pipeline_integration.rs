//! End-to-end pipeline runs against local git repositories and a scripted
//! container runtime.

use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use supplyline_ci::fakes::ScriptedRuntime;
use supplyline_ci::stage::OUTPUT_MOUNT;
use supplyline_ci::{Pipeline, PipelineConfig, PipelineStage, RunMode};
use supplyline_core::{BuildTool, GitCredentials, PipelineError, RefKind, RegistryFields};
use supplyline_store::fakes::MemoryObjectStore;

const SBOM_DOC: &str = r#"{"spdxVersion":"SPDX-2.3","creationInfo":{"creators":["Tool: syft"]},"packages":[]}"#;

const VULN_DOC: &str = r#"{
  "matches": [
    {"vulnerability": {"id": "CVE-2024-0001", "severity": "High", "fix": {"versions": ["1.0.1"]}}},
    {"vulnerability": {"id": "CVE-2024-0002", "severity": "High", "fix": {"versions": []}}},
    {"vulnerability": {"id": "GHSA-xxxx", "severity": "Low", "fix": {"versions": ["2.0"]}}},
    {"vulnerability": {"id": "", "severity": "Critical", "fix": {"versions": []}}}
  ]
}"#;

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Origin repository at `dir` with one commit on `branch`.
fn make_origin(dir: &Path, branch: &str) -> String {
    std::fs::create_dir_all(dir).unwrap();
    run_git(dir, &["init", "--quiet"]);
    run_git(dir, &["checkout", "--quiet", "-b", branch]);
    run_git(dir, &["config", "user.name", "test-user"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
    run_git(dir, &["add", "main.go"]);
    run_git(dir, &["commit", "--quiet", "-m", "initial"]);
    run_git(dir, &["rev-parse", "HEAD"])
}

fn full_registry() -> RegistryFields {
    RegistryFields {
        server: "registry.example.com".to_string(),
        username: "robot".to_string(),
        password: "s3cret".to_string(),
        email: "robot@example.com".to_string(),
        repository: "team".to_string(),
        image_name: "app".to_string(),
        image_tag: "1.4.0".to_string(),
    }
}

fn scripted() -> ScriptedRuntime {
    ScriptedRuntime::new()
        .with_output("sbom", OUTPUT_MOUNT, "sbom.json", SBOM_DOC)
        .with_output("scan", OUTPUT_MOUNT, "vuln.json", VULN_DOC)
}

fn assert_cleaned(workdir: &Path) {
    assert!(!workdir.join("src").exists(), "source tree left behind");
    assert!(!workdir.join("scratch").exists(), "scratch left behind");
    let lock = std::fs::File::open(workdir.join(".supplyline.lock")).unwrap();
    lock.try_lock_exclusive().expect("workspace lock still held");
}

fn workdir(tmp: &tempfile::TempDir) -> PathBuf {
    tmp.path().join("run")
}

/// Test: ko build to a configured registry, SBOM, scan and upload
#[tokio::test]
async fn test_full_run_with_configured_registry() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    let head = make_origin(&origin, "main");

    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.build_tool = BuildTool::Ko;
    config.registry = full_registry();
    config.bucket = Some("supply-chain".to_string());

    let runtime = Arc::new(scripted());
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .with_object_store(store.clone());

    let outcome = pipeline.run().await.expect("pipeline failed");

    assert_eq!(outcome.checkout.ref_name, "main");
    assert_eq!(outcome.checkout.ref_kind, RefKind::Branch);
    assert_eq!(outcome.checkout.commit_hash, head);
    assert_eq!(outcome.image.reference(), "registry.example.com/team/app:1.4.0");
    assert!(!outcome.image.ephemeral);

    let tally = outcome.tally.expect("tally");
    assert_eq!(tally.count("High"), 2);
    assert_eq!(tally.count("Low"), 1);
    assert_eq!(tally.count("Critical"), 0);
    assert_eq!(tally.total(), 3);
    assert_eq!(tally.fixable_count, 2);

    assert_eq!(runtime.stages(), vec!["build:ko", "sbom", "scan"]);
    let sbom_call = &runtime.invocations()[1];
    assert_eq!(sbom_call.args[0], "registry.example.com/team/app:1.4.0");

    assert_eq!(
        store.keys(),
        vec![
            ("supply-chain".to_string(), "sbom.json".to_string()),
            ("supply-chain".to_string(), "vuln.json".to_string()),
        ]
    );

    let artifacts = workdir(&tmp).join("artifacts");
    assert!(artifacts.join("sbom.json").exists());
    assert!(artifacts.join("vuln.json").exists());
    let stages: Vec<PipelineStage> = outcome.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            PipelineStage::Checkout,
            PipelineStage::Build,
            PipelineStage::Sbom,
            PipelineStage::Scan,
            PipelineStage::Summarize,
        ]
    );
    assert_cleaned(&workdir(&tmp));
}

/// Test: no target configured pushes to an ephemeral coordinate
#[tokio::test]
async fn test_unconfigured_registry_uses_ephemeral_coordinate() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("My-Service.git");
    make_origin(&origin, "master");

    let mut registry = full_registry();
    registry.password.clear();
    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.registry = registry;

    let runtime = Arc::new(scripted());
    let outcome = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .run()
        .await
        .expect("pipeline failed");

    let reference = outcome.image.reference();
    assert!(outcome.image.ephemeral);
    assert!(reference.starts_with("ttl.sh/my-service-"), "{reference}");
    assert!(reference.ends_with(":60m"), "{reference}");
    assert_eq!(outcome.checkout.ref_name, "master");

    let build_call = &runtime.invocations()[0];
    assert_eq!(build_call.stage, "build:buildpack");
    assert_eq!(build_call.mounts.len(), 1, "no credential mount expected");
}

/// Test: repository with only `develop` aborts before any tool runs
#[tokio::test]
async fn test_no_usable_ref_aborts_without_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "develop");

    let config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    let runtime = Arc::new(scripted());
    let err = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::RefNotFound { .. }), "{err}");
    assert_eq!(err.stage(), "checkout");
    assert!(runtime.invocations().is_empty());
    let artifacts = workdir(&tmp).join("artifacts");
    assert!(!artifacts.join("sbom.json").exists());
    assert!(!artifacts.join("vuln.json").exists());
    assert_cleaned(&workdir(&tmp));
}

/// Test: requested tag wins and the build sees the tagged tree
#[tokio::test]
async fn test_tag_is_built() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "main");
    run_git(&origin, &["tag", "v1.0.0"]);
    let tagged = run_git(&origin, &["rev-parse", "HEAD"]);
    std::fs::write(origin.join("later.go"), "package main\n").unwrap();
    run_git(&origin, &["add", "later.go"]);
    run_git(&origin, &["commit", "--quiet", "-m", "later"]);

    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.tag = Some("v1.0.0".to_string());
    config.branch = Some("main".to_string());
    config.mode = RunMode::BuildOnly;

    let runtime = Arc::new(scripted());
    let outcome = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .run()
        .await
        .expect("pipeline failed");

    assert_eq!(outcome.checkout.ref_kind, RefKind::Tag);
    assert_eq!(outcome.checkout.commit_hash, tagged);
    assert!(outcome.sbom.is_none());
    assert!(outcome.tally.is_none());
    assert_eq!(runtime.stages(), vec!["build:buildpack"]);
    assert_cleaned(&workdir(&tmp));
}

/// Test: failed build stops the run and stale artifacts are gone
#[tokio::test]
async fn test_build_failure_aborts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "main");
    let artifacts = workdir(&tmp).join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::write(artifacts.join("sbom.json"), "stale").unwrap();
    std::fs::write(artifacts.join("vuln.json"), "stale").unwrap();

    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.build_tool = BuildTool::Ko;
    let runtime = Arc::new(scripted().exit_with("build:ko", 1, "go: build failed"));
    let err = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .run()
        .await
        .unwrap_err();

    match &err {
        PipelineError::Build {
            stage,
            exit_code,
            output,
        } => {
            assert_eq!(stage, "build:ko");
            assert_eq!(*exit_code, 1);
            assert!(output.contains("go: build failed"));
        }
        other => panic!("expected Build, got {other:?}"),
    }
    assert_eq!(runtime.stages(), vec!["build:ko"]);
    assert!(!artifacts.join("sbom.json").exists());
    assert!(!artifacts.join("vuln.json").exists());
    assert_cleaned(&workdir(&tmp));
}

/// Test: an SBOM upload failure is fatal and the scan never runs
#[tokio::test]
async fn test_upload_failure_aborts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "main");

    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.bucket = Some("supply-chain".to_string());
    let runtime = Arc::new(scripted());
    let err = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous())
        .with_object_store(Arc::new(MemoryObjectStore::failing()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Sbom(_)), "{err}");
    assert_eq!(runtime.stages(), vec!["build:buildpack", "sbom"]);
    assert!(!workdir(&tmp).join("artifacts").join("vuln.json").exists());
    assert_cleaned(&workdir(&tmp));
}

/// Test: malformed scanner output fails the summary stage
#[tokio::test]
async fn test_invalid_report_fails_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "main");

    let config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    let runtime = Arc::new(
        ScriptedRuntime::new()
            .with_output("sbom", OUTPUT_MOUNT, "sbom.json", SBOM_DOC)
            .with_output("scan", OUTPUT_MOUNT, "vuln.json", r#"{"results": []}"#),
    );
    let err = Pipeline::new(config, runtime, GitCredentials::anonymous())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ReportParse { .. }), "{err}");
    assert_eq!(err.stage(), "summarize");
    assert_cleaned(&workdir(&tmp));
}

/// Test: dropping a run mid-build stops the tool and cleans the workspace
#[tokio::test]
async fn test_cancelled_run_stops_tool_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("app");
    make_origin(&origin, "main");

    let mut config = PipelineConfig::new(origin.to_string_lossy(), workdir(&tmp));
    config.build_tool = BuildTool::Ko;
    let runtime = Arc::new(scripted().block_stage("build:ko"));
    let pipeline = Pipeline::new(config, runtime.clone(), GitCredentials::anonymous());

    let build_started = async {
        while runtime.stages().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::select! {
        result = pipeline.run() => panic!("run finished while its build was blocked: {result:?}"),
        _ = build_started => {}
    }

    assert_eq!(runtime.stages(), vec!["build:ko"]);
    assert_eq!(runtime.removed(), vec!["build:ko"]);
    assert!(!workdir(&tmp).join("artifacts").join("sbom.json").exists());
    assert_cleaned(&workdir(&tmp));
}
