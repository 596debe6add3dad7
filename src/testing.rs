//! Shared fixtures for unit tests: an in-process registry and small images
//! built from real tar+gzip layers

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::manifest::{ANNOTATION_SPECIFIER, ANNOTATION_UNCOMPRESSED_DIGEST};
use crate::image::{
    ArtifactConfig, Descriptor, ImageConfig, ImageManifest, ManifestIndex, Platform, media_types,
    stable_json,
};
use crate::registry::{ManifestHead, ManifestResponse, RegistryClient};
use crate::store::{BlobReader, DescriptorHint, Namespace, Store};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;

#[derive(Default)]
pub struct FakeRegistry {
    pub name: String,
    pub blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    /// Manifests by digest, with their media type
    pub manifests: Mutex<HashMap<Digest, (String, Vec<u8>)>>,
    pub tags: Mutex<HashMap<String, Digest>>,
    blob_downloads: AtomicUsize,
    blob_uploads: AtomicUsize,
    manifest_gets: AtomicUsize,
    manifest_puts: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn add_blob(&self, data: &[u8]) -> Digest {
        let digest = Digest::of_bytes(data);
        self.blobs.lock().insert(digest.clone(), data.to_vec());
        digest
    }

    pub fn add_manifest(&self, media_type: &str, bytes: &[u8], tag: Option<&str>) -> Digest {
        let digest = Digest::of_bytes(bytes);
        self.manifests
            .lock()
            .insert(digest.clone(), (media_type.to_string(), bytes.to_vec()));
        if let Some(tag) = tag {
            self.tags.lock().insert(tag.to_string(), digest.clone());
        }
        digest
    }

    pub fn downloads(&self) -> usize {
        self.blob_downloads.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.blob_uploads.load(Ordering::SeqCst)
    }

    pub fn manifest_gets(&self) -> usize {
        self.manifest_gets.load(Ordering::SeqCst)
    }

    pub fn manifest_puts(&self) -> usize {
        self.manifest_puts.load(Ordering::SeqCst)
    }

    fn missing(what: &str) -> OciError {
        OciError::transport(Some(404), format!("{} unknown", what))
    }

    fn lookup_manifest(&self, reference: &str) -> Option<(Digest, String, Vec<u8>)> {
        let digest = match reference.parse::<Digest>() {
            Ok(digest) => digest,
            Err(_) => self.tags.lock().get(reference).cloned()?,
        };
        let (media_type, bytes) = self.manifests.lock().get(&digest).cloned()?;
        Some((digest, media_type, bytes))
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    fn repository(&self) -> &str {
        &self.name
    }

    async fn head_blob(&self, digest: &Digest) -> Result<Option<u64>> {
        Ok(self.blobs.lock().get(digest).map(|b| b.len() as u64))
    }

    async fn get_blob(&self, digest: &Digest) -> Result<BlobReader> {
        let data = self
            .blobs
            .lock()
            .get(digest)
            .cloned()
            .ok_or_else(|| Self::missing("blob"))?;
        self.blob_downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(data)))
    }

    async fn put_blob(&self, descriptor: &Descriptor, mut reader: BlobReader) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        if Digest::of_bytes(&data) != descriptor.digest {
            return Err(OciError::transport(Some(400), "digest invalid"));
        }
        self.blob_uploads.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().insert(descriptor.digest.clone(), data);
        Ok(())
    }

    async fn head_manifest(&self, reference: &str) -> Result<Option<ManifestHead>> {
        Ok(self
            .lookup_manifest(reference)
            .map(|(digest, media_type, bytes)| ManifestHead {
                digest,
                size: bytes.len() as u64,
                media_type,
            }))
    }

    async fn get_manifest(&self, reference: &str) -> Result<ManifestResponse> {
        let (digest, media_type, bytes) = self
            .lookup_manifest(reference)
            .ok_or_else(|| Self::missing("manifest"))?;
        self.manifest_gets.fetch_add(1, Ordering::SeqCst);
        Ok(ManifestResponse {
            bytes,
            digest,
            media_type,
        })
    }

    async fn put_manifest(&self, bytes: Vec<u8>, media_type: &str, reference: &str) -> Result<Digest> {
        self.manifest_puts.fetch_add(1, Ordering::SeqCst);
        let tag = reference.parse::<Digest>().is_err().then_some(reference);
        Ok(self.add_manifest(media_type, &bytes, tag))
    }
}

/// Build a tar archive of `files` and gzip it, returning the compressed
/// bytes and the diff-ID of the uncompressed tar
pub fn tar_gz(files: &[(&str, &[u8])]) -> (Vec<u8>, Digest) {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    let raw = builder.into_inner().unwrap();
    let diff_id = Digest::of_bytes(&raw);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    (encoder.finish().unwrap(), diff_id)
}

/// A complete single-platform image held in memory
#[derive(Debug, Clone)]
pub struct ImageFixture {
    pub manifest: ImageManifest,
    pub manifest_bytes: Vec<u8>,
    /// Descriptor of the manifest itself
    pub descriptor: Descriptor,
    /// Config first, then layers
    pub blobs: Vec<(Descriptor, Vec<u8>)>,
    pub diff_ids: Vec<Digest>,
}

impl ImageFixture {
    /// Docker-flavoured base image with one layer per entry of `layers`
    pub fn base(architecture: &str, layers: &[&[(&str, &[u8])]]) -> Self {
        let mut blobs = Vec::new();
        let mut diff_ids = Vec::new();
        for files in layers {
            let (gz, diff_id) = tar_gz(files);
            let desc = Descriptor::new(media_types::DOCKER_LAYER_TAR_GZIP, Digest::of_bytes(&gz), gz.len() as u64);
            blobs.push((desc, gz));
            diff_ids.push(diff_id);
        }

        let history: Vec<_> = diff_ids
            .iter()
            .map(|_| serde_json::json!({ "created_by": "ADD rootfs" }))
            .collect();
        let config: ImageConfig = serde_json::from_value(serde_json::json!({
            "architecture": architecture,
            "os": "linux",
            "config": {
                "Env": ["PATH=/usr/local/bin:/usr/bin", "DENO_DIR=/deno-dir/"],
                "Entrypoint": ["/tini", "--", "docker-entrypoint.sh"],
                "Cmd": ["run", "https://deno.land/std/examples/welcome.ts"],
                "WorkingDir": "/"
            },
            "rootfs": { "type": "layers", "diff_ids": diff_ids },
            "history": history,
        }))
        .unwrap();
        Self::assemble(
            media_types::DOCKER_MANIFEST_V2,
            media_types::DOCKER_CONFIG_V1,
            stable_json(&config).unwrap(),
            blobs,
            diff_ids,
        )
    }

    /// Artifact with one layer per entry of `layers`, annotated the way the
    /// layer pipeline annotates them unless `annotate` is false
    pub fn artifact(entrypoint: &str, layers: &[&[(&str, &[u8])]], annotate: bool) -> Self {
        let mut blobs = Vec::new();
        let mut diff_ids = Vec::new();
        for (i, files) in layers.iter().enumerate() {
            let (gz, diff_id) = tar_gz(files);
            let mut desc = Descriptor::new(
                media_types::DENODIR_LAYER_V1_TAR_GZIP,
                Digest::of_bytes(&gz),
                gz.len() as u64,
            )
            .with_annotation(ANNOTATION_SPECIFIER, format!("file:///app/layer{}.ts", i));
            if annotate {
                desc = desc.with_annotation(ANNOTATION_UNCOMPRESSED_DIGEST, diff_id.to_string());
            }
            blobs.push((desc, gz));
            diff_ids.push(diff_id);
        }

        let config: ArtifactConfig = serde_json::from_value(serde_json::json!({
            "builtWith": { "deno": "1.40.0" },
            "entrypoint": entrypoint,
            "runtimeFlags": ["--allow-net"],
        }))
        .unwrap();
        Self::assemble(
            media_types::OCI_MANIFEST_V1,
            media_types::DENODIR_CONFIG_V1,
            stable_json(&config).unwrap(),
            blobs,
            diff_ids,
        )
    }

    fn assemble(
        manifest_type: &str,
        config_type: &str,
        config_bytes: Vec<u8>,
        layers: Vec<(Descriptor, Vec<u8>)>,
        diff_ids: Vec<Digest>,
    ) -> Self {
        let config_desc = Descriptor::new(config_type, Digest::of_bytes(&config_bytes), config_bytes.len() as u64);
        let manifest = ImageManifest {
            media_type: Some(manifest_type.to_string()),
            ..ImageManifest::new(
                config_desc.clone(),
                layers.iter().map(|(d, _)| d.clone()).collect(),
            )
        };
        let manifest_bytes = stable_json(&manifest).unwrap();
        let descriptor = Descriptor::new(
            manifest_type,
            Digest::of_bytes(&manifest_bytes),
            manifest_bytes.len() as u64,
        );

        let mut blobs = vec![(config_desc, config_bytes)];
        blobs.extend(layers);
        Self {
            manifest,
            manifest_bytes,
            descriptor,
            blobs,
            diff_ids,
        }
    }

    pub fn digest(&self) -> &Digest {
        &self.descriptor.digest
    }

    pub fn layer_digests(&self) -> Vec<Digest> {
        self.manifest.layers.iter().map(|d| d.digest.clone()).collect()
    }

    /// Write every blob and the manifest into `store`
    pub async fn install(&self, store: &dyn Store) {
        for (desc, data) in &self.blobs {
            store
                .put_bytes(
                    Namespace::Blob,
                    DescriptorHint::new(desc.media_type.clone()).with_digest(desc.digest.clone()),
                    data,
                )
                .await
                .unwrap();
        }
        store
            .put_bytes(
                Namespace::Manifest,
                DescriptorHint::new(self.descriptor.media_type.clone()),
                &self.manifest_bytes,
            )
            .await
            .unwrap();
    }

    /// Make the image available from `registry`, optionally under `tag`
    pub fn publish(&self, registry: &FakeRegistry, tag: Option<&str>) {
        for (_, data) in &self.blobs {
            registry.add_blob(data);
        }
        registry.add_manifest(&self.descriptor.media_type, &self.manifest_bytes, tag);
    }
}

/// Multi-platform index over `children`, returning its bytes and descriptor
pub fn index_of(children: &[(&ImageFixture, Platform)]) -> (Vec<u8>, Descriptor) {
    let manifests = children
        .iter()
        .map(|(image, platform)| Descriptor {
            platform: Some(platform.clone()),
            ..image.descriptor.clone()
        })
        .collect();
    let index = ManifestIndex {
        media_type: Some(media_types::OCI_INDEX_V1.to_string()),
        ..ManifestIndex::new(manifests)
    };
    let bytes = stable_json(&index).unwrap();
    let descriptor = Descriptor::new(media_types::OCI_INDEX_V1, Digest::of_bytes(&bytes), bytes.len() as u64);
    (bytes, descriptor)
}

pub fn platform(architecture: &str, os: &str) -> Platform {
    Platform {
        architecture: architecture.to_string(),
        os: os.to_string(),
        os_version: None,
        os_features: None,
        variant: None,
    }
}
