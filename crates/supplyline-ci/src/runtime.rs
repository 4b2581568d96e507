//! Container execution: typed invocations and the runtimes that execute them.
//!
//! Stages describe what to run as a [`ContainerInvocation`]; a
//! [`ContainerRuntime`] decides how. Files a tool produces are observed through
//! host directories mounted into the container, never by inspecting the
//! container itself.
//!
//! [`DockerRuntime`] names every container it starts. Killing the CLI client
//! does not stop the container, so a cancelled or timed-out invocation removes
//! its container by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use supplyline_core::{PipelineError, Result};

/// Host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    fn volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// One tool run inside one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInvocation {
    /// Stage label used in errors and logs (e.g. `build:ko`).
    pub stage: String,
    pub image: String,
    /// Overrides the image entrypoint when set.
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
    /// Wall-clock limit in seconds; 0 waits indefinitely.
    pub timeout_secs: u64,
}

impl ContainerInvocation {
    pub fn new(stage: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            image: image.into(),
            entrypoint: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            workdir: None,
            timeout_secs: 0,
        }
    }

    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Host directory mounted at `container_path`, if any.
    pub fn host_path_for(&self, container_path: &str) -> Option<&PathBuf> {
        self.mounts
            .iter()
            .find(|m| m.container == container_path)
            .map(|m| &m.host)
    }
}

/// Result of a finished invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit code (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes container invocations and waits for them to finish.
///
/// Implementations must stop the container when the returned future is
/// dropped, so cancelling a run never leaves a tool running.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run the invocation to completion. A non-zero exit is reported through
    /// [`ToolOutput::exit_code`], not as an error; `Err` means the tool could
    /// not be run at all.
    async fn run(&self, invocation: &ContainerInvocation) -> Result<ToolOutput>;
}

/// Runtime that shells out to `docker run --rm`.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerRuntime {
    /// Use a docker-compatible CLI (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments passed to the runtime binary to start `invocation` as the
    /// container `name`.
    pub fn command_args(invocation: &ContainerInvocation, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        if let Some(entrypoint) = &invocation.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }
        if let Some(workdir) = &invocation.workdir {
            args.push("--workdir".to_string());
            args.push(workdir.clone());
        }
        for (key, value) in &invocation.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &invocation.mounts {
            args.push("--volume".to_string());
            args.push(mount.volume_arg());
        }
        args.push(invocation.image.clone());
        args.extend(invocation.args.iter().cloned());
        args
    }
}

/// Unique container name for one invocation of `stage`, e.g.
/// `supplyline-build-ko-1f2e3d4c5b6a`.
pub fn container_name(stage: &str) -> String {
    let stage: String = stage
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let id = Uuid::new_v4().simple().to_string();
    format!("supplyline-{stage}-{}", &id[..12])
}

/// Force-removes a named container when dropped while armed.
struct ContainerGuard {
    binary: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(binary: &str, name: &str) -> Self {
        Self {
            binary: binary.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(container = %self.name, "removing container");
        // std process, so removal survives runtime shutdown.
        let spawned = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            warn!(container = %self.name, error = %e, "failed to remove container");
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<ToolOutput> {
        let start = Instant::now();
        let name = container_name(&invocation.stage);
        let args = Self::command_args(invocation, &name);
        debug!(stage = %invocation.stage, image = %invocation.image, container = %name, "starting container");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::runtime(
                    &invocation.stage,
                    format!("cannot start {}: {e}", self.binary),
                )
            })?;
        let guard = ContainerGuard::new(&self.binary, &name);

        let waited = if invocation.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(invocation.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                PipelineError::runtime(
                    &invocation.stage,
                    format!("timed out after {} seconds", invocation.timeout_secs),
                )
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| {
            PipelineError::runtime(&invocation.stage, format!("waiting for {name}: {e}"))
        })?;
        guard.disarm();

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}
