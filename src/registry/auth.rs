//! Docker client configuration and registry credentials
//!
//! Reads the `auths`, `credHelpers` and `credsStore` sections of a Docker
//! `config.json`. Inline `auth` entries are decoded here; credential helpers
//! are only reported, since running them is up to the registry client.

use crate::error::{OciError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Server name Docker Hub credentials are filed under
pub const DOCKER_HUB_INDEX: &str = "index.docker.io";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    pub creds_store: Option<String>,
    #[serde(default)]
    pub cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEntry {
    /// base64 of `user:secret`
    pub auth: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCredential {
    pub username: String,
    pub secret: String,
}

/// Where the credentials for one server come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Decoded from an `auths` entry
    Inline(DockerCredential),
    /// Must be fetched from `docker-credential-<name>`
    Helper(String),
}

impl DockerConfig {
    /// Load a config file; a missing file is an empty config
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_slice(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no docker config, using anonymous access");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Resolve the credential source for a registry host.
    ///
    /// A per-registry helper wins over the global `credsStore`, which wins
    /// over inline `auths` entries.
    pub fn credential_for(&self, server: &str) -> Result<Option<CredentialSource>> {
        let index = index_name(server);

        if let Some(helper) = self.cred_helpers.get(index) {
            return Ok(Some(CredentialSource::Helper(helper.clone())));
        }
        if let Some(store) = &self.creds_store {
            return Ok(Some(CredentialSource::Helper(store.clone())));
        }

        for (key, entry) in &self.auths {
            let Some(auth) = &entry.auth else { continue };
            if auth_key_host(key)? == index {
                return decode_basic_auth(auth).map(|c| Some(CredentialSource::Inline(c)));
            }
        }
        Ok(None)
    }
}

/// Map a registry host to the name credentials are stored under
pub fn index_name(server: &str) -> &str {
    if server == "docker.io" || server.ends_with(".docker.io") {
        DOCKER_HUB_INDEX
    } else {
        server
    }
}

/// `auths` keys are either bare hosts or URLs such as `https://index.docker.io/v1/`
fn auth_key_host(key: &str) -> Result<String> {
    if !key.contains("://") {
        return Ok(key.to_string());
    }
    let url = url::Url::parse(key)?;
    let host = url
        .host_str()
        .ok_or_else(|| OciError::Credentials(format!("auth key '{}' has no host", key)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn decode_basic_auth(auth: &str) -> Result<DockerCredential> {
    let decoded = String::from_utf8(STANDARD.decode(auth.trim())?)
        .map_err(|_| OciError::Credentials("auth entry is not UTF-8".to_string()))?;
    let (username, secret) = decoded
        .split_once(':')
        .ok_or_else(|| OciError::Credentials("auth entry is not user:secret".to_string()))?;
    Ok(DockerCredential {
        username: username.to_string(),
        secret: secret.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: serde_json::Value) -> DockerConfig {
        DockerConfig::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap()
    }

    #[test]
    fn test_index_name_normalizes_hub() {
        assert_eq!(index_name("docker.io"), DOCKER_HUB_INDEX);
        assert_eq!(index_name("registry-1.docker.io"), DOCKER_HUB_INDEX);
        assert_eq!(index_name("ghcr.io"), "ghcr.io");
    }

    #[test]
    fn test_inline_auth_by_url_key() {
        let cfg = config(serde_json::json!({
            "auths": {
                "https://index.docker.io/v1/": { "auth": STANDARD.encode("alice:s3cr:et") }
            }
        }));
        let source = cfg.credential_for("docker.io").unwrap();
        assert_eq!(
            source,
            Some(CredentialSource::Inline(DockerCredential {
                username: "alice".to_string(),
                secret: "s3cr:et".to_string(),
            }))
        );
        assert_eq!(cfg.credential_for("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_inline_auth_by_host_key_with_port() {
        let cfg = config(serde_json::json!({
            "auths": { "localhost:5000": { "auth": STANDARD.encode("bob:pw") } }
        }));
        match cfg.credential_for("localhost:5000").unwrap() {
            Some(CredentialSource::Inline(cred)) => assert_eq!(cred.username, "bob"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_helpers_take_precedence() {
        let cfg = config(serde_json::json!({
            "auths": { "ghcr.io": { "auth": STANDARD.encode("u:p") } },
            "credsStore": "desktop",
            "credHelpers": { "ghcr.io": "gh" }
        }));
        assert_eq!(
            cfg.credential_for("ghcr.io").unwrap(),
            Some(CredentialSource::Helper("gh".to_string()))
        );
        assert_eq!(
            cfg.credential_for("quay.io").unwrap(),
            Some(CredentialSource::Helper("desktop".to_string()))
        );
    }

    #[test]
    fn test_malformed_auth_is_an_error() {
        let cfg = config(serde_json::json!({
            "auths": { "ghcr.io": { "auth": STANDARD.encode("no-separator") } }
        }));
        assert!(matches!(cfg.credential_for("ghcr.io"), Err(OciError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DockerConfig::load(&dir.path().join("config.json")).await.unwrap();
        assert!(cfg.auths.is_empty());
        assert!(cfg.creds_store.is_none());
    }
}
