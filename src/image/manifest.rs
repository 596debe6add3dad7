//! Descriptors, image manifests and manifest indexes
//!
//! These mirror the OCI image-spec v1 / Docker distribution v2 JSON shapes.
//! Manifests are immutable once stored: the compositor always builds a new
//! [`ImageManifest`] or [`ManifestIndex`] rather than editing one in place.

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::media_types::{self, ManifestKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Annotations = BTreeMap<String, String>;

/// Annotation carrying the source a pulled manifest came from
pub const ANNOTATION_ORIGIN: &str = "vnd.denodir.origin";
pub const ANNOTATION_UNCOMPRESSED_DIGEST: &str = "uncompressed-digest";
pub const ANNOTATION_UNCOMPRESSED_SIZE: &str = "uncompressed-size";
pub const ANNOTATION_SPECIFIER: &str = "specifier";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
pub const ANNOTATION_BASE_DIGEST: &str = "org.opencontainers.image.base.digest";
pub const ANNOTATION_BASE_NAME: &str = "org.opencontainers.image.base.name";
pub const ANNOTATION_REVISION: &str = "org.opencontainers.image.revision";
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Platform of one entry of a manifest index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Typed, sized pointer to content in a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// `urls`, `artifactType`, `data` and anything newer, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
            platform: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(Annotations::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// A single-image manifest: one config plus ordered layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::OCI_MANIFEST_V1.to_string()),
            config,
            layers,
            annotations: None,
        }
    }

    /// Config first, then every layer in manifest order
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// Multi-platform fan-out over child manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl ManifestIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_types::OCI_INDEX_V1.to_string()),
            manifests,
            annotations: None,
        }
    }
}

/// Either kind of manifest document, parsed from raw bytes
#[derive(Debug, Clone)]
pub enum ParsedManifest {
    Image(ImageManifest),
    Index(ManifestIndex),
}

impl ParsedManifest {
    /// Parse manifest bytes.
    ///
    /// The kind comes from `media_type` when the caller knows it (e.g. from a
    /// descriptor), then from the document's own `mediaType`, and finally from
    /// its shape, since OCI documents may omit `mediaType`.
    pub fn parse(bytes: &[u8], media_type: Option<&str>, digest: &Digest) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let declared = value
            .get("mediaType")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let kind = match media_type.or(declared.as_deref()) {
            Some(mt) => ManifestKind::from_media_type(mt)
                .ok_or_else(|| OciError::unsupported_media_type(mt, digest))?,
            None if value.get("manifests").is_some() => ManifestKind::Index,
            None if value.get("layers").is_some() => ManifestKind::Image,
            None => return Err(OciError::unsupported_media_type("<none>", digest)),
        };

        let schema_version = value.get("schemaVersion").and_then(|v| v.as_u64());
        if schema_version != Some(2) {
            return Err(OciError::InvalidImage(format!(
                "manifest {} has schemaVersion {:?}, expected 2",
                digest, schema_version
            )));
        }

        Ok(match kind {
            ManifestKind::Image => ParsedManifest::Image(serde_json::from_value(value)?),
            ManifestKind::Index => ParsedManifest::Index(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> ManifestKind {
        match self {
            ParsedManifest::Image(_) => ManifestKind::Image,
            ParsedManifest::Index(_) => ManifestKind::Index,
        }
    }

    /// Media type of the document, defaulting to the OCI variant of its kind
    pub fn media_type(&self) -> &str {
        match self {
            ParsedManifest::Image(m) => m
                .media_type
                .as_deref()
                .unwrap_or(media_types::OCI_MANIFEST_V1),
            ParsedManifest::Index(i) => i
                .media_type
                .as_deref()
                .unwrap_or(media_types::OCI_INDEX_V1),
        }
    }
}
