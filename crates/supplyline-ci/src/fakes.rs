//! Scripted container runtime (testing only)
//!
//! Records every invocation and, instead of running anything, writes scripted
//! files into the host directories the invocation mounts. Exit codes default
//! to 0 and can be scripted per stage label. A stage can also be made to
//! block until its future is dropped, which records the stage as removed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use supplyline_core::{PipelineError, Result};

use crate::runtime::{ContainerInvocation, ContainerRuntime, ToolOutput};

#[derive(Debug, Clone)]
struct ScriptedFile {
    mount_point: String,
    file_name: String,
    contents: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ScriptedExit {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Marks a blocked stage as removed when its future is dropped.
struct RemoveOnDrop {
    stage: String,
    removed: Arc<Mutex<Vec<String>>>,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.removed.lock().unwrap().push(self.stage.clone());
    }
}

/// Fake [`ContainerRuntime`] keyed by invocation stage label
/// (`build:ko`, `build:buildpack`, `sbom`, `scan`, `rebase`).
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    files: HashMap<String, Vec<ScriptedFile>>,
    exits: HashMap<String, ScriptedExit>,
    blocked: HashSet<String>,
    invocations: Mutex<Vec<ContainerInvocation>>,
    removed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// On a `stage` invocation, write `contents` to `<host of mount_point>/<file_name>`.
    pub fn with_output(
        mut self,
        stage: &str,
        mount_point: &str,
        file_name: &str,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        self.files
            .entry(stage.to_string())
            .or_default()
            .push(ScriptedFile {
                mount_point: mount_point.to_string(),
                file_name: file_name.to_string(),
                contents: contents.into(),
            });
        self
    }

    /// Make `stage` exit with `exit_code`, printing `stderr`. No files are
    /// written for a failing stage.
    pub fn exit_with(self, stage: &str, exit_code: i32, stderr: &str) -> Self {
        self.exit_with_output(stage, exit_code, "", stderr)
    }

    /// Like [`ScriptedRuntime::exit_with`], also printing `stdout`.
    pub fn exit_with_output(mut self, stage: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.exits.insert(
            stage.to_string(),
            ScriptedExit {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    /// Make `stage` never finish. Dropping its future records the stage in
    /// [`ScriptedRuntime::removed`].
    pub fn block_stage(mut self, stage: &str) -> Self {
        self.blocked.insert(stage.to_string());
        self
    }

    /// Invocations seen so far, in order.
    pub fn invocations(&self) -> Vec<ContainerInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Stage labels seen so far, in order.
    pub fn stages(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|inv| inv.stage.clone())
            .collect()
    }

    /// Blocked stages whose future was dropped, in order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<ToolOutput> {
        self.invocations.lock().unwrap().push(invocation.clone());

        if self.blocked.contains(&invocation.stage) {
            let _guard = RemoveOnDrop {
                stage: invocation.stage.clone(),
                removed: self.removed.clone(),
            };
            std::future::pending::<()>().await;
        }

        if let Some(exit) = self.exits.get(&invocation.stage) {
            return Ok(ToolOutput {
                exit_code: exit.exit_code,
                stdout: exit.stdout.clone(),
                stderr: exit.stderr.clone(),
                duration_ms: 0,
            });
        }

        for file in self.files.get(&invocation.stage).into_iter().flatten() {
            let dir = invocation.host_path_for(&file.mount_point).ok_or_else(|| {
                PipelineError::runtime(
                    &invocation.stage,
                    format!("no mount at {}", file.mount_point),
                )
            })?;
            tokio::fs::write(dir.join(&file.file_name), &file.contents).await?;
        }

        Ok(ToolOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }
}
