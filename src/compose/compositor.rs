//! Stacks an artifact's layers onto a base image

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::manifest::{ANNOTATION_BASE_DIGEST, ANNOTATION_SPECIFIER, ANNOTATION_UNCOMPRESSED_DIGEST};
use crate::image::{
    Annotations, ArtifactConfig, ConfigWriter, Descriptor, ImageConfig, ImageManifest,
    ManifestIndex, ParsedManifest, media_types, stable_json,
};
use crate::pipeline;
use crate::store::{DescriptorHint, Namespace, Store};
use chrono::{SecondsFormat, Utc};

/// Prefix stripped from layer specifiers when writing history entries
const DENODIR_FILE_PREFIX: &str = "file:///denodir/deps/file/";

/// Knobs for the generated runtime config
#[derive(Debug, Clone, PartialEq)]
pub struct EjectOptions {
    /// Command prefix placed before the artifact's flags and entrypoint
    pub launcher: Vec<String>,
    /// Variables forced in the image environment
    pub env: Vec<(String, String)>,
    /// Comment stamped on every history entry the compositor appends
    pub comment: String,
    /// RFC 3339 creation time; the current time when unset
    pub created: Option<String>,
}

impl Default for EjectOptions {
    fn default() -> Self {
        Self {
            launcher: vec!["deno".into(), "run".into(), "--cached-only".into()],
            env: vec![("DENO_DIR".into(), "/denodir".into())],
            comment: "cloudydeno.denodir-oci.v0".into(),
            created: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EjectRequest {
    /// Base image manifest or multi-platform index
    pub base_digest: Digest,
    /// Artifact image manifest
    pub artifact_digest: Digest,
    pub annotations: Annotations,
}

/// The artifact side of an ejection, loaded once and reused per platform
struct ArtifactPlan {
    layers: Vec<Descriptor>,
    diff_ids: Vec<Digest>,
    config: ArtifactConfig,
}

/// Reads from `source` and writes every generated document to `target`
pub struct Compositor<'a> {
    source: &'a dyn Store,
    target: &'a dyn Store,
    options: EjectOptions,
}

impl<'a> Compositor<'a> {
    pub fn new(source: &'a dyn Store, target: &'a dyn Store) -> Self {
        Self {
            source,
            target,
            options: EjectOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EjectOptions) -> Self {
        self.options = options;
        self
    }

    /// Produce a runnable image from `request.base_digest` and
    /// `request.artifact_digest`.
    ///
    /// A multi-platform base yields a new OCI index with one ejected image
    /// per platform; attestation entries (`os == "unknown"`) are dropped.
    pub async fn eject(&self, request: EjectRequest) -> Result<Descriptor> {
        let created = self
            .options
            .created
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        let plan = self.load_artifact(&request.artifact_digest).await?;

        let base_bytes = self
            .source
            .get_full(Namespace::Manifest, &request.base_digest)
            .await?;
        match ParsedManifest::parse(&base_bytes, None, &request.base_digest)? {
            ParsedManifest::Image(base) => {
                let mut annotations = request.annotations.clone();
                annotations.insert(
                    ANNOTATION_BASE_DIGEST.to_string(),
                    request.base_digest.to_string(),
                );
                self.eject_image(&request.base_digest, base, &plan, annotations, &created)
                    .await
            }
            ParsedManifest::Index(index) => {
                self.eject_index(index, &plan, request.annotations, &created)
                    .await
            }
        }
    }

    async fn eject_index(
        &self,
        base: ManifestIndex,
        plan: &ArtifactPlan,
        annotations: Annotations,
        created: &str,
    ) -> Result<Descriptor> {
        let mut children = Vec::new();
        for entry in base.manifests {
            if entry.platform.as_ref().is_some_and(|p| p.os == "unknown") {
                tracing::debug!(digest = %entry.digest, "skipping attestation manifest");
                continue;
            }

            let bytes = self.source.get_full(Namespace::Manifest, &entry.digest).await?;
            let manifest = match ParsedManifest::parse(&bytes, Some(&entry.media_type), &entry.digest)? {
                ParsedManifest::Image(manifest) => manifest,
                ParsedManifest::Index(_) => {
                    return Err(OciError::InvalidImage(format!(
                        "nested index {} in base image",
                        entry.digest
                    )));
                }
            };

            let mut child_annotations = Annotations::new();
            child_annotations.insert(ANNOTATION_BASE_DIGEST.to_string(), entry.digest.to_string());
            let ejected = self
                .eject_image(&entry.digest, manifest, plan, child_annotations, created)
                .await?;
            children.push(Descriptor {
                platform: entry.platform,
                ..ejected
            });
        }

        let index = ManifestIndex {
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..ManifestIndex::new(children)
        };
        let descriptor = self
            .target
            .put_bytes(
                Namespace::Manifest,
                DescriptorHint::new(media_types::OCI_INDEX_V1),
                &stable_json(&index)?,
            )
            .await?;
        tracing::info!(digest = %descriptor.digest, platforms = index.manifests.len(), "ejected multi-platform image");
        Ok(descriptor)
    }

    async fn eject_image(
        &self,
        base_digest: &Digest,
        base: ImageManifest,
        plan: &ArtifactPlan,
        annotations: Annotations,
        created: &str,
    ) -> Result<Descriptor> {
        let config_bytes = self
            .source
            .get_full(Namespace::Blob, &base.config.digest)
            .await?;
        let base_config: ImageConfig = serde_json::from_slice(&config_bytes)?;
        if base_config.rootfs.diff_ids.len() != base.layers.len() {
            return Err(OciError::InvalidImage(format!(
                "base {} lists {} diff_ids for {} layers",
                base_digest,
                base_config.rootfs.diff_ids.len(),
                base.layers.len()
            )));
        }

        let mut writer = ConfigWriter::new(base_config, self.options.comment.clone(), created);
        for (key, value) in &self.options.env {
            writer.set_env(key, value);
        }
        for (layer, diff_id) in plan.layers.iter().zip(&plan.diff_ids) {
            let specifier = layer
                .annotation(ANNOTATION_SPECIFIER)
                .map(|s| s.trim_start_matches(DENODIR_FILE_PREFIX))
                .unwrap_or("[...]");
            writer.record_diff_layer(format!("RUN deno cache {}", specifier), diff_id.clone());
        }

        let mut entrypoint = self.options.launcher.clone();
        entrypoint.extend(plan.config.launch_flags());
        entrypoint.push(plan.config.entrypoint.clone());
        writer.set_entrypoint(entrypoint);
        writer.set_command(Vec::new());

        let config = self
            .target
            .put_bytes(
                Namespace::Blob,
                DescriptorHint::new(media_types::OCI_CONFIG_V1),
                &stable_json(&writer.finish())?,
            )
            .await?;

        let mut layers = base.layers;
        layers.extend(plan.layers.iter().cloned());
        let manifest = ImageManifest {
            annotations: Some(annotations),
            ..ImageManifest::new(config, layers)
        };
        let descriptor = self
            .target
            .put_bytes(
                Namespace::Manifest,
                DescriptorHint::new(media_types::OCI_MANIFEST_V1),
                &stable_json(&manifest)?,
            )
            .await?;

        tracing::info!(
            base = %base_digest,
            digest = %descriptor.digest,
            layers = manifest.layers.len(),
            "ejected image"
        );
        Ok(descriptor)
    }

    async fn load_artifact(&self, digest: &Digest) -> Result<ArtifactPlan> {
        let bytes = self.source.get_full(Namespace::Manifest, digest).await?;
        let manifest = match ParsedManifest::parse(&bytes, None, digest)? {
            ParsedManifest::Image(manifest) => manifest,
            ParsedManifest::Index(_) => {
                return Err(OciError::InvalidImage(format!(
                    "artifact {} is an index, expected a single manifest",
                    digest
                )));
            }
        };

        let config: ArtifactConfig = serde_json::from_slice(
            &self
                .source
                .get_full(Namespace::Blob, &manifest.config.digest)
                .await?,
        )?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        let mut diff_ids = Vec::with_capacity(manifest.layers.len());
        for layer in manifest.layers {
            diff_ids.push(self.diff_id(&layer).await?);
            layers.push(Descriptor {
                media_type: media_types::OCI_LAYER_V1_TAR_GZIP.to_string(),
                ..layer
            });
        }

        Ok(ArtifactPlan {
            layers,
            diff_ids,
            config,
        })
    }

    async fn diff_id(&self, layer: &Descriptor) -> Result<Digest> {
        if let Some(recorded) = layer.annotation(ANNOTATION_UNCOMPRESSED_DIGEST) {
            return recorded.parse();
        }
        tracing::debug!(digest = %layer.digest, "computing uncompressed digest");
        let reader = self.source.get_stream(Namespace::Blob, &layer.digest).await?;
        let (diff_id, _) = pipeline::uncompressed_digest(reader).await?;
        Ok(diff_id)
    }
}
