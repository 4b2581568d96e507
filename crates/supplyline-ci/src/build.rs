//! Image build dispatch.
//!
//! Every build follows the same shape whatever the tool:
//!
//! 1. copy the checkout (minus `.git`) into a fresh build context
//! 2. mount registry credentials when a full target is configured; the file
//!    is world-readable inside an owner-only directory, since the tool may
//!    run under a uid other than ours
//! 3. pick the coordinate: the configured target, or an ephemeral one
//! 4. run the tool, which builds and pushes to that coordinate
//! 5. report exactly the coordinate that was used
//!
//! Tool specifics live behind [`BuildStrategy`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use supplyline_core::{
    BuildTool, BuiltImage, ImageCoordinate, PipelineError, RegistryFields, RegistryTarget,
    ResolvedCheckout, Result,
};

use crate::runtime::{ContainerInvocation, ContainerRuntime, Mount};
use crate::stage::ToolImages;
use crate::workspace::{copy_tree, RunWorkspace};

/// Container path of the build context.
pub const CONTEXT_MOUNT: &str = "/workspace";

/// Writable copy of the context the buildpack lifecycle builds from. The
/// builder runs as the unprivileged `cnb` user, which cannot write into a
/// host-owned bind mount.
pub const BUILDPACK_APP_DIR: &str = "/tmp/app";

/// Where the build is pushed: a configured target or an ephemeral registry.
#[derive(Debug, Clone)]
pub struct RegistryPlan {
    target: Option<RegistryTarget>,
    repo_base: String,
}

impl RegistryPlan {
    /// Plan from raw operator fields. Partial fields count as no target.
    pub fn from_fields(fields: &RegistryFields, repo_base: &str) -> Self {
        Self {
            target: RegistryTarget::from_fields(fields),
            repo_base: repo_base.to_string(),
        }
    }

    /// Plan that always pushes to the ephemeral registry.
    pub fn ephemeral(repo_base: &str) -> Self {
        Self {
            target: None,
            repo_base: repo_base.to_string(),
        }
    }

    pub fn target(&self) -> Option<&RegistryTarget> {
        self.target.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    /// Coordinate for this build and whether it is ephemeral. Ephemeral
    /// coordinates get a fresh random suffix on every call.
    pub fn coordinate(&self) -> (ImageCoordinate, bool) {
        match &self.target {
            Some(target) => (target.coordinate(), false),
            None => (ImageCoordinate::ephemeral(&self.repo_base), true),
        }
    }
}

/// Tool-specific half of a build.
pub trait BuildStrategy: Send + Sync {
    fn tool(&self) -> BuildTool;

    /// Container path where the tool reads its docker `config.json`.
    fn credential_path(&self) -> &'static str;

    /// Invocation that builds the context at [`CONTEXT_MOUNT`] and pushes it
    /// to `coordinate`. Mounts and timeout are added by the dispatcher.
    fn invocation(&self, coordinate: &ImageCoordinate) -> ContainerInvocation;

    /// How the host build context is mounted.
    fn context_mount(&self, context: &Path) -> Mount {
        Mount::read_write(context, CONTEXT_MOUNT)
    }
}

/// Cloud Native Buildpacks lifecycle (`creator`).
#[derive(Debug, Clone)]
pub struct BuildpackStrategy {
    builder_image: String,
}

impl BuildpackStrategy {
    pub fn new(builder_image: impl Into<String>) -> Self {
        Self {
            builder_image: builder_image.into(),
        }
    }
}

impl BuildStrategy for BuildpackStrategy {
    fn tool(&self) -> BuildTool {
        BuildTool::Buildpack
    }

    fn credential_path(&self) -> &'static str {
        "/home/cnb/.docker/config.json"
    }

    /// `creator` runs on a private copy of the read-only context; the image
    /// reference is passed as `$1`.
    fn invocation(&self, coordinate: &ImageCoordinate) -> ContainerInvocation {
        let script = format!(
            "mkdir -p {app} && tar -C {ctx} -cf - . | tar -C {app} -xf - && cd {app} && exec /cnb/lifecycle/creator -app=. \"$1\"",
            app = BUILDPACK_APP_DIR,
            ctx = CONTEXT_MOUNT,
        );
        ContainerInvocation::new(stage_label(self.tool()), &self.builder_image)
            .entrypoint("/bin/sh")
            .args(["-c".to_string(), script, "creator".to_string(), coordinate.to_string()])
            .env("CNB_PLATFORM_API", "0.8")
    }

    fn context_mount(&self, context: &Path) -> Mount {
        Mount::read_only(context, CONTEXT_MOUNT)
    }
}

/// ko, for Go sources.
#[derive(Debug, Clone)]
pub struct KoStrategy {
    ko_image: String,
}

impl KoStrategy {
    pub fn new(ko_image: impl Into<String>) -> Self {
        Self {
            ko_image: ko_image.into(),
        }
    }
}

impl BuildStrategy for KoStrategy {
    fn tool(&self) -> BuildTool {
        BuildTool::Ko
    }

    fn credential_path(&self) -> &'static str {
        "/root/.docker/config.json"
    }

    fn invocation(&self, coordinate: &ImageCoordinate) -> ContainerInvocation {
        ContainerInvocation::new(stage_label(self.tool()), &self.ko_image)
            .entrypoint("ko")
            .args(["build", ".", "--bare", "-t", coordinate.tag.as_str()])
            .env("KO_DOCKER_REPO", coordinate.repository())
            .workdir(CONTEXT_MOUNT)
    }
}

/// Stage label carried by build errors, e.g. `build:ko`.
pub fn stage_label(tool: BuildTool) -> String {
    format!("build:{}", tool.name())
}

/// Strategy for a tool, using the configured images.
pub fn strategy_for(tool: BuildTool, images: &ToolImages) -> Box<dyn BuildStrategy> {
    match tool {
        BuildTool::Ko => Box::new(KoStrategy::new(&images.ko)),
        BuildTool::Buildpack => Box::new(BuildpackStrategy::new(&images.builder)),
    }
}

/// Runs the selected build strategy.
pub struct BuildDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
    strategy: Box<dyn BuildStrategy>,
    timeout_secs: u64,
}

impl BuildDispatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, tool: BuildTool, images: &ToolImages) -> Self {
        Self {
            runtime,
            strategy: strategy_for(tool, images),
            timeout_secs: images.timeout_secs,
        }
    }

    pub fn tool(&self) -> BuildTool {
        self.strategy.tool()
    }

    /// Build `checkout` and push it according to `plan`.
    pub async fn build(
        &self,
        checkout: &ResolvedCheckout,
        plan: &RegistryPlan,
        workspace: &RunWorkspace,
    ) -> Result<BuiltImage> {
        let stage_dir = workspace.stage_dir("build")?;
        let context = stage_dir.join("context");
        let files = copy_tree(&checkout.working_tree, &context, &[".git"])?;
        debug!(files, context = %context.display(), "materialized build context");

        let (coordinate, ephemeral) = plan.coordinate();
        let mut invocation = self
            .strategy
            .invocation(&coordinate)
            .mount(self.strategy.context_mount(&context))
            .timeout_secs(self.timeout_secs);

        if let Some(config) = plan.target().and_then(RegistryTarget::docker_config) {
            let path = write_registry_config(&stage_dir.join("registry"), &config.to_json_bytes()?)?;
            invocation = invocation.mount(Mount::read_only(&path, self.strategy.credential_path()));
        }

        info!(
            tool = self.tool().name(),
            image = %coordinate,
            ephemeral,
            commit = %checkout.short_hash(),
            "building image"
        );
        let output = self.runtime.run(&invocation).await?;
        if !output.success() {
            return Err(PipelineError::build_failed(
                &invocation.stage,
                output.exit_code,
                &output.stdout,
                &output.stderr,
            ));
        }

        Ok(BuiltImage {
            coordinate,
            tool: self.tool(),
            ephemeral,
        })
    }
}

/// Write `config.json` into `dir`. The directory is owner-only; the file is
/// readable by any uid, which only a bind mount of the file itself reaches.
fn write_registry_config(dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("config.json");
    fs::write(&path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRuntime;
    use supplyline_core::RefKind;

    fn full_fields() -> RegistryFields {
        RegistryFields {
            server: "registry.example.com".to_string(),
            username: "robot".to_string(),
            password: "pw".to_string(),
            email: "robot@example.com".to_string(),
            repository: "team".to_string(),
            image_name: "app".to_string(),
            image_tag: "v1".to_string(),
        }
    }

    fn checkout(tree: &Path) -> ResolvedCheckout {
        fs::create_dir_all(tree.join(".git")).unwrap();
        fs::write(tree.join(".git/HEAD"), "ref").unwrap();
        fs::write(tree.join("main.go"), "package main").unwrap();
        ResolvedCheckout {
            ref_name: "main".to_string(),
            ref_kind: RefKind::Branch,
            commit_hash: "0123456789abcdef".to_string(),
            working_tree: tree.to_path_buf(),
        }
    }

    #[test]
    fn test_buildpack_invocation_shape() {
        let coord = ImageCoordinate::ephemeral("app");
        let strategy = BuildpackStrategy::new("paketobuildpacks/builder:base");
        let inv = strategy.invocation(&coord);
        assert_eq!(inv.image, "paketobuildpacks/builder:base");
        assert_eq!(inv.entrypoint.as_deref(), Some("/bin/sh"));
        assert_eq!(inv.args.len(), 4);
        assert_eq!(inv.args[0], "-c");
        assert_eq!(inv.args[3], coord.to_string());
        assert_eq!(inv.env.get("CNB_PLATFORM_API").map(String::as_str), Some("0.8"));
        assert_eq!(inv.stage, "build:buildpack");

        // Copy out of the read-only mount first, then build the copy.
        let script = &inv.args[1];
        let copy = script.find("tar -C /workspace -cf - . | tar -C /tmp/app -xf -").unwrap();
        let create = script.find("exec /cnb/lifecycle/creator -app=. \"$1\"").unwrap();
        assert!(copy < create, "{script}");
        assert!(script.contains("cd /tmp/app"), "{script}");

        let mount = strategy.context_mount(Path::new("/host/context"));
        assert!(mount.read_only);
        assert_eq!(mount.container, CONTEXT_MOUNT);
    }

    #[test]
    fn test_ko_invocation_shape() {
        let target = RegistryTarget::from_fields(&full_fields()).unwrap();
        let coord = target.coordinate();
        let inv = KoStrategy::new("cgr.dev/chainguard/ko:latest").invocation(&coord);
        assert_eq!(inv.entrypoint.as_deref(), Some("ko"));
        assert_eq!(inv.args, vec!["build", ".", "--bare", "-t", "v1"]);
        assert_eq!(
            inv.env.get("KO_DOCKER_REPO").map(String::as_str),
            Some("registry.example.com/team/app")
        );
    }

    #[test]
    fn test_partial_fields_plan_is_ephemeral() {
        let mut fields = full_fields();
        fields.email.clear();
        let plan = RegistryPlan::from_fields(&fields, "app");
        assert!(!plan.is_configured());
        let (coord, ephemeral) = plan.coordinate();
        assert!(ephemeral);
        assert_eq!(coord.registry, "ttl.sh");
    }

    #[tokio::test]
    async fn test_configured_build_mounts_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create(&tmp.path().join("run")).unwrap();
        let checkout = checkout(&ws.src_dir());
        let runtime = Arc::new(ScriptedRuntime::new());
        let dispatcher = BuildDispatcher::new(runtime.clone(), BuildTool::Ko, &ToolImages::default());

        let plan = RegistryPlan::from_fields(&full_fields(), "app");
        let image = dispatcher.build(&checkout, &plan, &ws).await.unwrap();
        assert_eq!(image.reference(), "registry.example.com/team/app:v1");
        assert!(!image.ephemeral);

        let calls = runtime.invocations();
        assert_eq!(calls.len(), 1);
        let creds = calls[0].host_path_for("/root/.docker/config.json").unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&fs::read(creds).unwrap()).unwrap();
        assert!(doc["auths"]["https://registry.example.com"]["auth"].is_string());

        let context = calls[0].host_path_for(CONTEXT_MOUNT).unwrap();
        assert!(context.join("main.go").exists());
        assert!(!context.join(".git").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_buildpack_credentials_readable_by_builder_uid() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create(tmp.path()).unwrap();
        let checkout = checkout(&ws.src_dir());
        let runtime = Arc::new(ScriptedRuntime::new());
        let dispatcher =
            BuildDispatcher::new(runtime.clone(), BuildTool::Buildpack, &ToolImages::default());

        let plan = RegistryPlan::from_fields(&full_fields(), "app");
        dispatcher.build(&checkout, &plan, &ws).await.unwrap();

        let call = &runtime.invocations()[0];
        let creds = call.host_path_for("/home/cnb/.docker/config.json").unwrap();
        let file_mode = fs::metadata(creds).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(creds.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o644);
        assert_eq!(dir_mode, 0o700);

        let creds_mount = call
            .mounts
            .iter()
            .find(|m| m.container == "/home/cnb/.docker/config.json")
            .unwrap();
        assert!(creds_mount.read_only);
        let context_mount = call.mounts.iter().find(|m| m.container == CONTEXT_MOUNT).unwrap();
        assert!(context_mount.read_only);
    }

    #[tokio::test]
    async fn test_ephemeral_build_has_no_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create(tmp.path()).unwrap();
        let checkout = checkout(&ws.src_dir());
        let runtime = Arc::new(ScriptedRuntime::new());
        let dispatcher =
            BuildDispatcher::new(runtime.clone(), BuildTool::Buildpack, &ToolImages::default());

        let image = dispatcher
            .build(&checkout, &RegistryPlan::ephemeral("app"), &ws)
            .await
            .unwrap();
        assert!(image.ephemeral);
        assert!(image.reference().starts_with("ttl.sh/app-"));
        assert!(image.reference().ends_with(":60m"));

        let calls = runtime.invocations();
        assert_eq!(calls[0].mounts.len(), 1);
        assert_eq!(calls[0].args[3], image.reference());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_build_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create(tmp.path()).unwrap();
        let checkout = checkout(&ws.src_dir());
        let runtime = Arc::new(ScriptedRuntime::new().exit_with("build:ko", 1, "denied"));
        let dispatcher = BuildDispatcher::new(runtime, BuildTool::Ko, &ToolImages::default());

        let err = dispatcher
            .build(&checkout, &RegistryPlan::ephemeral("app"), &ws)
            .await
            .unwrap_err();
        match err {
            PipelineError::Build {
                stage,
                exit_code,
                output,
            } => {
                assert_eq!(stage, "build:ko");
                assert_eq!(exit_code, 1);
                assert!(output.contains("denied"));
            }
            other => panic!("expected Build, got {other:?}"),
        }
    }
}
