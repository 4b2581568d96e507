//! Picks the commit to build from a fresh clone.
//!
//! Priority, first match wins:
//! 1. requested tag, if it exists
//! 2. requested branch, if it exists
//! 3. `main`
//! 4. `master`
//!
//! A requested tag or branch that does not exist falls through to the next
//! rule rather than failing the run.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::domain::error::{PipelineError, Result};
use crate::domain::source::{RefKind, ResolvedCheckout, SourceRef};
use crate::git::{self, GitCredentials, RefListing};

/// Default branches tried, in order, when no hint matches.
pub const DEFAULT_BRANCHES: [&str; 2] = ["main", "master"];

/// A ref chosen by [`select_ref`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRef {
    pub name: String,
    pub kind: RefKind,
}

impl SelectedRef {
    fn tag(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RefKind::Tag,
        }
    }

    fn branch(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RefKind::Branch,
        }
    }

    /// Fully qualified ref name inside the clone.
    pub fn full_refname(&self) -> String {
        match self.kind {
            RefKind::Tag => git::tag_ref(&self.name),
            RefKind::Branch => git::remote_branch_ref(&self.name),
        }
    }
}

/// Apply the resolution priority to a ref listing.
pub fn select_ref(
    listing: &RefListing,
    branch_hint: Option<&str>,
    tag_hint: Option<&str>,
) -> Option<SelectedRef> {
    if let Some(tag) = tag_hint.filter(|t| !t.is_empty()) {
        if listing.has_tag(tag) {
            return Some(SelectedRef::tag(tag));
        }
        warn!(tag = %tag, "requested tag not found, falling back to branch resolution");
    }

    if let Some(branch) = branch_hint.filter(|b| !b.is_empty()) {
        if listing.has_branch(branch) {
            return Some(SelectedRef::branch(branch));
        }
        warn!(branch = %branch, "requested branch not found, falling back to default branches");
    }

    DEFAULT_BRANCHES
        .iter()
        .find(|name| listing.has_branch(name))
        .map(|name| SelectedRef::branch(name))
}

/// Clones a repository and pins a working tree to the resolved commit.
#[derive(Debug, Clone)]
pub struct RefResolver {
    credentials: GitCredentials,
}

impl RefResolver {
    pub fn new(credentials: GitCredentials) -> Self {
        Self { credentials }
    }

    /// Reset `working_dir`, clone into it, select a ref and check out its commit.
    ///
    /// Any state left in `working_dir` by an earlier run is removed first.
    /// Dropping the returned future kills the git process in flight.
    pub async fn resolve(&self, source: &SourceRef, working_dir: &Path) -> Result<ResolvedCheckout> {
        reset_dir(working_dir)?;

        info!(repository = %source.repository_url, "cloning repository");
        git::clone_full(&source.repository_url, working_dir, &self.credentials).await?;

        let listing = git::list_refs(working_dir).await?;
        debug!(
            branches = listing.branches.len(),
            tags = listing.tags.len(),
            "enumerated refs"
        );

        let selected = select_ref(
            &listing,
            source.requested_branch.as_deref(),
            source.requested_tag.as_deref(),
        )
        .ok_or_else(|| PipelineError::RefNotFound {
            repository: source.repository_url.clone(),
            branch: source.requested_branch.clone(),
            tag: source.requested_tag.clone(),
        })?;

        let commit = git::resolve_commit(working_dir, &selected.full_refname()).await?;
        git::checkout_commit(working_dir, &commit).await?;

        let head = git::capture_head_sha(working_dir).await?;
        if head != commit {
            return Err(PipelineError::Git(format!(
                "checkout landed on {head}, expected {commit}"
            )));
        }

        info!(
            ref_name = %selected.name,
            ref_kind = %selected.kind,
            commit = %commit,
            "resolved checkout"
        );

        Ok(ResolvedCheckout {
            ref_name: selected.name,
            ref_kind: selected.kind,
            commit_hash: commit,
            working_tree: working_dir.to_path_buf(),
        })
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| {
            PipelineError::Workspace(format!("cannot clear {}: {e}", dir.display()))
        })?;
    }
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(branches: &[&str], tags: &[&str]) -> RefListing {
        RefListing {
            branches: branches.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_existing_tag_beats_everything() {
        let refs = listing(&["main", "master", "dev"], &["v1.0"]);
        let selected = select_ref(&refs, Some("dev"), Some("v1.0")).unwrap();
        assert_eq!(selected, SelectedRef::tag("v1.0"));
        assert_eq!(selected.full_refname(), "refs/tags/v1.0");
    }

    #[test]
    fn test_branch_hint_used_when_tag_missing() {
        let refs = listing(&["main", "dev"], &["v1.0"]);
        let selected = select_ref(&refs, Some("dev"), Some("v2.0")).unwrap();
        assert_eq!(selected, SelectedRef::branch("dev"));
        assert_eq!(selected.full_refname(), "refs/remotes/origin/dev");
    }

    #[test]
    fn test_main_preferred_over_master() {
        let refs = listing(&["master", "main"], &[]);
        assert_eq!(
            select_ref(&refs, None, None).unwrap(),
            SelectedRef::branch("main")
        );
    }

    #[test]
    fn test_master_fallback() {
        let refs = listing(&["master", "dev"], &[]);
        assert_eq!(
            select_ref(&refs, Some("missing"), None).unwrap(),
            SelectedRef::branch("master")
        );
    }

    #[test]
    fn test_missing_tag_falls_through_to_defaults() {
        let refs = listing(&["main"], &[]);
        assert_eq!(
            select_ref(&refs, None, Some("v9")).unwrap(),
            SelectedRef::branch("main")
        );
    }

    #[test]
    fn test_no_usable_ref() {
        let refs = listing(&["develop"], &["v1"]);
        assert!(select_ref(&refs, None, None).is_none());
        assert!(select_ref(&refs, Some(""), Some("")).is_none());
    }

    #[test]
    fn test_reset_dir_removes_stale_state() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("src");
        std::fs::create_dir_all(dir.join("leftover")).unwrap();
        std::fs::write(dir.join("leftover/file"), b"stale").unwrap();
        reset_dir(&dir).unwrap();
        assert!(!dir.exists());
        assert!(root.path().exists());
    }
}
