//! Registry targets, image coordinates and built images.
//!
//! Operator input arrives as [`RegistryFields`], which may be partially
//! filled. It only becomes a [`RegistryTarget`] when every field is present;
//! anything less is treated exactly like no target at all and the build falls
//! back to an ephemeral coordinate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credentials::{assemble, DockerConfig};

/// Disposable registry used when no durable target is configured.
pub const EPHEMERAL_REGISTRY: &str = "ttl.sh";

/// Tag doubling as the ephemeral registry's expiry.
pub const EPHEMERAL_TAG: &str = "60m";

/// Length of the random suffix appended to ephemeral image names.
const EPHEMERAL_SUFFIX_LEN: usize = 5;

/// Raw registry settings as supplied by the operator. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryFields {
    pub server: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub email: String,
    pub repository: String,
    pub image_name: String,
    pub image_tag: String,
}

/// Fully specified registry target. Cannot be constructed with a missing field.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    server: String,
    username: String,
    password: String,
    email: String,
    repository: String,
    image_name: String,
    image_tag: String,
}

impl RegistryTarget {
    /// Validate raw fields; `None` unless all seven are non-empty.
    pub fn from_fields(fields: &RegistryFields) -> Option<Self> {
        let all = [
            &fields.server,
            &fields.username,
            &fields.password,
            &fields.email,
            &fields.repository,
            &fields.image_name,
            &fields.image_tag,
        ];
        if all.iter().any(|f| f.trim().is_empty()) {
            return None;
        }
        Some(Self {
            server: fields.server.trim().to_string(),
            username: fields.username.clone(),
            password: fields.password.clone(),
            email: fields.email.trim().to_string(),
            repository: fields.repository.trim().trim_matches('/').to_string(),
            image_name: fields.image_name.trim().to_string(),
            image_tag: fields.image_tag.trim().to_string(),
        })
    }

    /// `server/repository/image_name:image_tag`
    pub fn coordinate(&self) -> ImageCoordinate {
        ImageCoordinate {
            registry: self.server.clone(),
            path: format!("{}/{}", self.repository, self.image_name),
            tag: self.image_tag.clone(),
        }
    }

    /// Credential blob for the builder's push step.
    pub fn docker_config(&self) -> Option<DockerConfig> {
        assemble(&self.username, &self.password, &self.email, &self.server)
    }
}

impl fmt::Debug for RegistryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryTarget")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .field("repository", &self.repository)
            .field("image_name", &self.image_name)
            .field("image_tag", &self.image_tag)
            .finish()
    }
}

/// Pullable image reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCoordinate {
    pub registry: String,
    pub path: String,
    pub tag: String,
}

impl ImageCoordinate {
    /// Ephemeral coordinate `ttl.sh/<repo_base>-<suffix>:60m`.
    ///
    /// The random suffix keeps concurrent runs of the same repository from
    /// overwriting each other's images.
    pub fn ephemeral(repo_base: &str) -> Self {
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(EPHEMERAL_SUFFIX_LEN)
            .collect();
        Self {
            registry: EPHEMERAL_REGISTRY.to_string(),
            path: format!("{repo_base}-{suffix}"),
            tag: EPHEMERAL_TAG.to_string(),
        }
    }

    /// Reference without the tag, e.g. for `KO_DOCKER_REPO`.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.registry, self.path)
    }
}

impl fmt::Display for ImageCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.path, self.tag)
    }
}

/// Build strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildTool {
    Ko,
    #[default]
    Buildpack,
}

impl BuildTool {
    /// `"ko"` selects the Go packager; every other value, including the empty
    /// string, selects the buildpack lifecycle.
    pub fn parse(value: &str) -> Self {
        if value.trim() == "ko" {
            BuildTool::Ko
        } else {
            BuildTool::Buildpack
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildTool::Ko => "ko",
            BuildTool::Buildpack => "buildpack",
        }
    }
}

/// Image produced and pushed by the build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub coordinate: ImageCoordinate,
    pub tool: BuildTool,
    pub ephemeral: bool,
}

impl BuiltImage {
    /// Fully qualified reference including tag.
    pub fn reference(&self) -> String {
        self.coordinate.to_string()
    }
}
