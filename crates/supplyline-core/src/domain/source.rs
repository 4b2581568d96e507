//! Source repository input and the checkout it resolves to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Repository to build plus optional ref hints.
///
/// Empty hints are normalized to `None` so "unset" and "set to empty" behave
/// the same everywhere downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub repository_url: String,
    pub requested_branch: Option<String>,
    pub requested_tag: Option<String>,
}

impl SourceRef {
    pub fn new(
        repository_url: impl Into<String>,
        branch: Option<String>,
        tag: Option<String>,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            requested_branch: non_empty(branch),
            requested_tag: non_empty(tag),
        }
    }

    /// Last path segment of the repository URL, usable as an image name.
    ///
    /// Strips a trailing slash and `.git`, and lowercases the result since
    /// registries reject upper-case repository names.
    pub fn repo_base_name(&self) -> String {
        let trimmed = self.repository_url.trim_end_matches('/');
        let last = trimmed
            .rsplit(|c: char| c == '/' || c == ':')
            .find(|segment| !segment.is_empty())
            .unwrap_or(trimmed);
        let last = last.strip_suffix(".git").unwrap_or(last);
        let name = last.to_ascii_lowercase();
        if name.is_empty() {
            "source".to_string()
        } else {
            name
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

/// Whether the resolved ref was a tag or a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Tag,
    Branch,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Tag => write!(f, "tag"),
            RefKind::Branch => write!(f, "branch"),
        }
    }
}

/// Working tree pinned to a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCheckout {
    pub ref_name: String,
    pub ref_kind: RefKind,
    pub commit_hash: String,
    pub working_tree: PathBuf,
}

impl ResolvedCheckout {
    /// First 12 characters of the commit hash.
    pub fn short_hash(&self) -> &str {
        let end = self.commit_hash.len().min(12);
        &self.commit_hash[..end]
    }
}
