//! supplyline - source to scanned container image
//!
//! The `supplyline` command clones a repository, builds and pushes an image,
//! generates its SBOM, scans it and prints a severity summary.
//!
//! ## Commands
//!
//! - `run`: execute the pipeline (or only its build, or a rebase)

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

use supplyline_ci::{
    ContainerRuntime, DockerRuntime, Pipeline, PipelineConfig, PipelineOutcome, RebaseOutcome,
    RunMode, SbomOptions, ToolImages,
};
use supplyline_core::{BuildTool, GitCredentials, RegistryFields};

#[derive(Parser)]
#[command(name = "supplyline")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, SBOM and vulnerability-scan a git repository", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON run summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one repository
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Repository to clone (https URL or local path)
    #[arg(long, required_unless_present = "rebase_only")]
    git_url: Option<String>,

    /// Branch to build when no tag is requested or the tag does not exist
    #[arg(long)]
    branch: Option<String>,

    /// Tag to build; wins over --branch
    #[arg(long)]
    tag: Option<String>,

    /// Buildpack builder image
    #[arg(long, default_value = "")]
    builder_image: String,

    /// Build tool: "ko" for Go sources, anything else uses buildpacks
    #[arg(long, default_value = "")]
    build_tool: String,

    /// Registry server, e.g. registry.example.com
    #[arg(long, default_value = "")]
    registry_server: String,

    #[arg(long, default_value = "")]
    registry_username: String,

    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true, default_value = "")]
    registry_password: String,

    #[arg(long, default_value = "")]
    registry_email: String,

    /// Repository path under the registry server
    #[arg(long, default_value = "")]
    registry_repo: String,

    #[arg(long, default_value = "")]
    image_name: String,

    #[arg(long, default_value = "")]
    image_tag: String,

    /// Bucket receiving sbom.json and vuln.json (requires S3_ACCESS_KEY_ID
    /// and S3_SECRET_ACCESS_KEY)
    #[arg(long)]
    object_store: Option<String>,

    /// Tool name written into the SBOM's creators
    #[arg(long, env = "SBOM_CREATOR")]
    sbom_creator: Option<String>,

    /// SBOM document namespace, used together with --sbom-creator
    #[arg(long, env = "SBOM_NAMESPACE")]
    sbom_namespace: Option<String>,

    /// Stop after the image is built and pushed
    #[arg(long, conflicts_with = "rebase_only")]
    build_only: bool,

    /// Only rebase an existing image onto the latest run image
    #[arg(long, requires = "image")]
    rebase_only: bool,

    /// Image to rebase
    #[arg(long)]
    image: Option<String>,

    /// Run workspace; artifacts are kept under <workdir>/artifacts
    #[arg(long, env = "SUPPLYLINE_WORKDIR", default_value = ".supplyline")]
    workdir: PathBuf,

    /// Per-tool timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// Docker-compatible CLI used to run tools
    #[arg(long, env = "SUPPLYLINE_CONTAINER_CLI", default_value = "docker")]
    container_cli: String,
}

impl RunArgs {
    fn registry(&self) -> RegistryFields {
        RegistryFields {
            server: self.registry_server.clone(),
            username: self.registry_username.clone(),
            password: self.registry_password.clone(),
            email: self.registry_email.clone(),
            repository: self.registry_repo.clone(),
            image_name: self.image_name.clone(),
            image_tag: self.image_tag.clone(),
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(
            self.git_url.clone().unwrap_or_default(),
            self.workdir.clone(),
        );
        config.branch = self.branch.clone();
        config.tag = self.tag.clone();
        config.build_tool = BuildTool::parse(&self.build_tool);
        config.registry = self.registry();
        config.bucket = self.object_store.clone();
        config.sbom = SbomOptions::new(
            self.sbom_creator.as_deref(),
            self.sbom_namespace.as_deref(),
        );
        config.images = ToolImages::default()
            .with_builder(&self.builder_image)
            .with_timeout(self.timeout_secs);
        config.mode = if self.build_only {
            RunMode::BuildOnly
        } else {
            RunMode::Full
        };
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    supplyline_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(&args, cli.json).await,
    }
}

/// Pipeline for `args`. A rebase uploads nothing, so it never needs object
/// store credentials.
async fn build_pipeline(
    args: &RunArgs,
    runtime: Arc<dyn ContainerRuntime>,
    credentials: GitCredentials,
) -> Result<Pipeline> {
    let config = args.pipeline_config();
    if args.rebase_only {
        return Ok(Pipeline::new(config, runtime, credentials));
    }
    Pipeline::connect(config, runtime, credentials)
        .await
        .context("Failed to configure pipeline")
}

/// Run the pipeline, aborting on Ctrl-C
async fn cmd_run(args: &RunArgs, json: bool) -> Result<()> {
    let runtime = Arc::new(DockerRuntime::with_binary(&args.container_cli));
    let credentials = GitCredentials::from_env();
    if !args.rebase_only && !credentials.has_token() {
        info!("GIT_TOKEN is not set; cloning anonymously");
    }

    let pipeline = build_pipeline(args, runtime, credentials).await?;

    if args.rebase_only {
        let image = args.image.as_deref().unwrap_or_default();
        let outcome = tokio::select! {
            result = pipeline.rebase(image) => result.context("Rebase failed")?,
            _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        };
        print_rebase(&outcome, json)?;
        return Ok(());
    }

    let outcome = tokio::select! {
        result = pipeline.run() => result.map_err(|e| {
            let stage = e.stage().to_string();
            anyhow::Error::new(e).context(format!("Pipeline failed at stage {stage}"))
        })?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };
    print_outcome(&outcome, json)
}

fn print_outcome(outcome: &PipelineOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    print!("{}", render_outcome(outcome));
    Ok(())
}

fn render_outcome(outcome: &PipelineOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run:     {}\n", outcome.run_id));
    out.push_str(&format!(
        "Source:  {} ({}) @ {}\n",
        outcome.checkout.ref_name,
        outcome.checkout.ref_kind,
        outcome.checkout.short_hash()
    ));
    out.push_str(&format!(
        "Image:   {}{}\n",
        outcome.image.reference(),
        if outcome.image.ephemeral {
            " (ephemeral)"
        } else {
            ""
        }
    ));
    if let Some(sbom) = &outcome.sbom {
        out.push_str(&format!("SBOM:    {}", sbom.path.display()));
        if let Some(key) = &sbom.uploaded_key {
            out.push_str(&format!(" (uploaded as {key})"));
        }
        out.push('\n');
    }
    if let Some(report) = &outcome.vuln_report {
        out.push_str(&format!("Report:  {}", report.path.display()));
        if let Some(key) = &report.uploaded_key {
            out.push_str(&format!(" (uploaded as {key})"));
        }
        out.push('\n');
    }
    if let Some(tally) = &outcome.tally {
        out.push_str(&format!(
            "\nVulnerabilities: {} ({} fixable)\n",
            tally.total(),
            tally.fixable_count
        ));
        for (severity, count) in tally.sorted() {
            out.push_str(&format!("  {severity}: {count}\n"));
        }
    }
    out.push_str(&format!("\nCompleted in {} ms\n", outcome.duration_ms));
    out
}

fn print_rebase(outcome: &RebaseOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("Rebased {} in {} ms", outcome.image_reference, outcome.duration_ms);
    }
    Ok(())
}
