//! Git plumbing: clone, ref enumeration, commit resolution and checkout.
//!
//! Everything shells out to the `git` binary through `tokio::process`, and a
//! dropped future kills the git process it started. Credentials reach git as
//! an `http.extraHeader` set through `GIT_CONFIG_*` environment variables, so
//! the token appears neither in the remote URL, in the clone's `.git/config`,
//! nor on git's command line.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;

use crate::domain::error::{PipelineError, Result};

/// Environment variable holding the git access token.
pub const GIT_TOKEN_ENV: &str = "GIT_TOKEN";

/// Basic-auth username sent alongside the token. Token-based remotes ignore
/// it, but the transport refuses an empty username.
pub const PLACEHOLDER_USERNAME: &str = "x-access-token";

const REMOTE_BRANCH_PREFIX: &str = "refs/remotes/origin/";
const LOCAL_BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

/// Substrings git prints when the remote rejected or demanded credentials.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid username or password",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
];

/// Clone credentials.
#[derive(Clone, Default)]
pub struct GitCredentials {
    token: Option<String>,
}

impl GitCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Read the token from `GIT_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(GIT_TOKEN_ENV).ok())
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            let basic = STANDARD.encode(format!("{PLACEHOLDER_USERNAME}:{token}"));
            format!("Authorization: Basic {basic}")
        })
    }
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &PLACEHOLDER_USERNAME)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Branches and tags available in a clone, by short name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefListing {
    pub branches: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl RefListing {
    /// Classify full ref names (`refs/remotes/origin/x`, `refs/heads/x`, `refs/tags/x`).
    pub fn from_refnames<I, S>(refnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut listing = RefListing::default();
        for refname in refnames {
            let refname = refname.as_ref().trim();
            if let Some(name) = refname.strip_prefix(REMOTE_BRANCH_PREFIX) {
                if name != "HEAD" && !name.is_empty() {
                    listing.branches.insert(name.to_string());
                }
            } else if let Some(name) = refname.strip_prefix(LOCAL_BRANCH_PREFIX) {
                if !name.is_empty() {
                    listing.branches.insert(name.to_string());
                }
            } else if let Some(name) = refname.strip_prefix(TAG_PREFIX) {
                if !name.is_empty() {
                    listing.tags.insert(name.to_string());
                }
            }
        }
        listing
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.contains(name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains(name)
    }
}

/// `git` with prompts disabled and, when a token is set, the auth header
/// supplied through the environment.
fn git_command(dir: Option<&Path>, credentials: Option<&GitCredentials>) -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(header) = credentials.and_then(GitCredentials::auth_header) {
        cmd.env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", header);
    }
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd
}

fn clone_command(url: &str, dest: &Path, credentials: &GitCredentials) -> Command {
    let mut cmd = git_command(None, Some(credentials));
    cmd.args(["clone", "--quiet", "--no-checkout", url])
        .arg(dest);
    cmd
}

async fn output_of(mut cmd: Command) -> Result<Output> {
    cmd.output()
        .await
        .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    let mut cmd = git_command(Some(dir), None);
    cmd.args(args);
    output_of(cmd).await
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn looks_like_auth_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Full clone of `url` into `dest` without checking out a working tree.
///
/// `dest` must not exist or be empty.
pub async fn clone_full(url: &str, dest: &Path, credentials: &GitCredentials) -> Result<()> {
    let output = output_of(clone_command(url, dest, credentials)).await?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = stderr_of(&output);
    if looks_like_auth_failure(&stderr) {
        let reason = if credentials.has_token() {
            format!("remote rejected the supplied token: {stderr}")
        } else {
            format!("remote requires a token but {GIT_TOKEN_ENV} is not set: {stderr}")
        };
        return Err(PipelineError::Authentication {
            repository: url.to_string(),
            reason,
        });
    }

    Err(PipelineError::Git(format!("git clone {url} failed: {stderr}")))
}

/// Enumerate remote branches and tags of a clone.
pub async fn list_refs(repo_dir: &Path) -> Result<RefListing> {
    let output = run_git(
        repo_dir,
        &[
            "for-each-ref",
            "--format=%(refname)",
            "refs/remotes/origin",
            "refs/heads",
            "refs/tags",
        ],
    )
    .await?;
    if !output.status.success() {
        return Err(PipelineError::Git(format!(
            "git for-each-ref failed: {}",
            stderr_of(&output)
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(RefListing::from_refnames(stdout.lines()))
}

/// Resolve a full ref name to the commit it points at, peeling annotated tags.
pub async fn resolve_commit(repo_dir: &Path, refname: &str) -> Result<String> {
    let spec = format!("{refname}^{{commit}}");
    let output = run_git(repo_dir, &["rev-parse", "--verify", "--quiet", &spec]).await?;
    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || hash.is_empty() {
        return Err(PipelineError::Git(format!(
            "cannot resolve {refname} to a commit: {}",
            stderr_of(&output)
        )));
    }
    Ok(hash)
}

/// Check out `commit` as a detached HEAD.
pub async fn checkout_commit(repo_dir: &Path, commit: &str) -> Result<()> {
    let output = run_git(
        repo_dir,
        &["checkout", "--quiet", "--force", "--detach", commit],
    )
    .await?;
    if !output.status.success() {
        return Err(PipelineError::Git(format!(
            "git checkout {commit} failed: {}",
            stderr_of(&output)
        )));
    }
    Ok(())
}

/// Capture the HEAD commit SHA from a git repository.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = run_git(repo_dir, &["rev-parse", "HEAD"]).await?;

    if !output.status.success() {
        return Err(PipelineError::Git(format!(
            "git rev-parse HEAD failed: {}",
            stderr_of(&output)
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(PipelineError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Full ref name for a remote branch short name.
pub fn remote_branch_ref(name: &str) -> String {
    format!("{REMOTE_BRANCH_PREFIX}{name}")
}

/// Full ref name for a tag short name.
pub fn tag_ref(name: &str) -> String {
    format!("{TAG_PREFIX}{name}")
}
