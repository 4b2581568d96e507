//! Registry credential blob in the `~/.docker/config.json` format.
//!
//! The blob is mounted into the build container so the builder tool can
//! authenticate its own push; supplyline never talks to the registry itself.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Docker client configuration holding per-registry auth entries.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub auths: BTreeMap<String, AuthEntry>,
}

/// Single registry auth entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    /// `base64(username:password)`
    pub auth: String,
    pub email: String,
}

impl DockerConfig {
    /// Serialized JSON, ready to be written to the mounted credential file.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl std::fmt::Debug for DockerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerConfig")
            .field("registries", &self.auths.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Assemble a credential blob for `https://<server>`.
///
/// Returns `None` when any field is empty: partial credentials mean "no
/// registry configured", not malformed input.
pub fn assemble(username: &str, password: &str, email: &str, server: &str) -> Option<DockerConfig> {
    if username.is_empty() || password.is_empty() || email.is_empty() || server.is_empty() {
        return None;
    }

    let auth = STANDARD.encode(format!("{username}:{password}"));
    let mut auths = BTreeMap::new();
    auths.insert(
        format!("https://{server}"),
        AuthEntry {
            auth,
            email: email.to_string(),
        },
    );
    Some(DockerConfig { auths })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_credentials_yield_none() {
        assert!(assemble("", "pw", "a@b.c", "reg.io").is_none());
        assert!(assemble("u", "", "a@b.c", "reg.io").is_none());
        assert!(assemble("u", "pw", "", "reg.io").is_none());
        assert!(assemble("u", "pw", "a@b.c", "").is_none());
    }

    #[test]
    fn test_auth_decodes_to_username_colon_password() {
        let config = assemble("robot", "p:ss/word", "robot@example.com", "reg.io").unwrap();
        let entry = config.auths.get("https://reg.io").unwrap();
        let decoded = STANDARD.decode(&entry.auth).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "robot:p:ss/word");
        assert_eq!(entry.email, "robot@example.com");
    }

    #[test]
    fn test_json_layout() {
        let config = assemble("u", "p", "e@x.io", "reg.io").unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&config.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value["auths"]["https://reg.io"]["auth"], "dTpw");
        assert_eq!(value["auths"]["https://reg.io"]["email"], "e@x.io");
    }

    #[test]
    fn test_debug_hides_auth() {
        let config = assemble("u", "p", "e@x.io", "reg.io").unwrap();
        let dbg = format!("{config:?}");
        assert!(dbg.contains("https://reg.io"));
        assert!(!dbg.contains("dTpw"));
    }
}
