//! Image reference parsing
//!
//! Turns `name[:tag][@digest]` strings into their registry, repository and
//! version parts, applying Docker Hub defaults (`docker.io`, `library/`,
//! `latest`).

use crate::digest::Digest;
use crate::error::{OciError, Result};
use std::fmt;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port if any (`ghcr.io`, `localhost:5000`)
    pub registry: String,
    /// Repository path within the registry (`library/alpine`)
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse a reference such as `alpine`, `ghcr.io/org/app:v1` or
    /// `registry:5000/app@sha256:...`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(OciError::InvalidReference("empty image reference".to_string()));
        }

        let (name_tag, digest) = match input.split_once('@') {
            Some((name, digest)) => (name, Some(digest.parse::<Digest>()?)),
            None => (input, None),
        };

        // a tag separator only counts after the last path segment, so that
        // `host:5000/app` keeps its port
        let last_segment = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment..].rfind(':') {
            Some(i) => {
                let split = last_segment + i;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };
        if tag.as_deref() == Some("") {
            return Err(OciError::InvalidReference(format!("empty tag in '{}'", input)));
        }

        let (registry, repository) = split_registry(name)?;
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository`, without any tag or digest
    pub fn canonical_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Fully qualified reference, digest winning over tag when both are set
    pub fn canonical_ref(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}@{}", self.canonical_name(), digest),
            (None, Some(tag)) => format!("{}:{}", self.canonical_name(), tag),
            (None, None) => self.canonical_name(),
        }
    }

    /// The part a registry resolves: the digest if pinned, else the tag
    pub fn reference(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry == DEFAULT_REGISTRY
    }
}

fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(OciError::InvalidReference(format!(
                    "missing repository in '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }
    if name.is_empty() {
        return Err(OciError::InvalidReference("missing repository name".to_string()));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_ref())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PINNED: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_docker_hub_defaults() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert!(r.is_docker_hub());
        assert_eq!(r.canonical_ref(), "docker.io/library/alpine:latest");
    }

    #[test]
    fn test_user_repository_on_hub() {
        let r = ImageReference::parse("denoland/deno:alpine-1.40.0").unwrap();
        assert_eq!(r.canonical_name(), "docker.io/denoland/deno");
        assert_eq!(r.reference(), "alpine-1.40.0");
    }

    #[test]
    fn test_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_digest_pinned() {
        let r = ImageReference::parse(&format!("ghcr.io/org/app:v1@{}", PINNED)).unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.reference(), PINNED);
        assert_eq!(r.canonical_ref(), format!("ghcr.io/org/app@{}", PINNED));

        let r = ImageReference::parse(&format!("ghcr.io/org/app@{}", PINNED)).unwrap();
        assert_eq!(r.tag, None);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("alpine@sha256:short").is_err());
        assert!(ImageReference::parse("alpine:").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
    }

    #[test]
    fn test_display_and_from_str() {
        let r: ImageReference = "ghcr.io/org/sub/app:v2".parse().unwrap();
        assert_eq!(r.repository, "org/sub/app");
        assert_eq!(r.to_string(), "ghcr.io/org/sub/app:v2");
    }
}
