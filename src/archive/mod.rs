//! Tarball export of stored images, and layer extraction
//!
//! Two export layouts are supported:
//! - [`ArchiveFormat::Docker`]: the `docker load` format (`manifest.json`,
//!   `repositories`, one directory per layer)
//! - [`ArchiveFormat::Oci`]: an OCI Image Layout (`oci-layout`,
//!   `index.json`, `blobs/sha256/...`)
//!
//! Archive bytes depend only on the exported content: entry metadata is
//! fixed and every JSON document is written with sorted keys.

mod docker;
mod oci;
mod tar_writer;
pub mod unpack;

pub use unpack::{UnpackStats, unpack_layer};

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::{Descriptor, ParsedManifest};
use crate::registry::ImageReference;
use crate::store::{Namespace, Store};
use tar_writer::TarWriter;
use tokio::io::AsyncWrite;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Docker,
    Oci,
}

impl std::str::FromStr for ArchiveFormat {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(ArchiveFormat::Docker),
            "oci" => Ok(ArchiveFormat::Oci),
            other => Err(OciError::Unsupported(format!("archive format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ArchiveFormat,
    /// Name recorded in the archive (`RepoTags` or `ref.name`)
    pub reference: Option<String>,
}

/// Write the image `manifest_digest` from `store` to `writer` as a tarball.
///
/// Only single-image manifests can be exported; an index is rejected with
/// `UnsupportedMediaType`. Returns the writer once the archive is complete.
pub async fn export_archive<W>(
    store: &dyn Store,
    manifest_digest: &Digest,
    options: &ExportOptions,
    writer: W,
) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    let reference = options
        .reference
        .as_deref()
        .map(ImageReference::parse)
        .transpose()?;

    let manifest_bytes = store.get_full(Namespace::Manifest, manifest_digest).await?;
    let parsed = ParsedManifest::parse(&manifest_bytes, None, manifest_digest)?;
    let media_type = parsed.media_type().to_string();
    let manifest = match parsed {
        ParsedManifest::Image(manifest) => manifest,
        ParsedManifest::Index(_) => {
            return Err(OciError::unsupported_media_type(media_type, manifest_digest));
        }
    };
    let config = store.get_full(Namespace::Blob, &manifest.config.digest).await?;

    let mut tar = TarWriter::new(writer);
    match options.format {
        ArchiveFormat::Docker => {
            docker::write(store, &manifest, &config, reference.as_ref(), &mut tar).await?
        }
        ArchiveFormat::Oci => {
            let descriptor = Descriptor::new(
                media_type,
                manifest_digest.clone(),
                manifest_bytes.len() as u64,
            );
            oci::write(
                store,
                &descriptor,
                &manifest_bytes,
                &manifest,
                &config,
                reference.as_ref(),
                &mut tar,
            )
            .await?
        }
    }

    tracing::info!(
        digest = %manifest_digest,
        format = ?options.format,
        layers = manifest.layers.len(),
        "exported archive"
    );
    tar.finish().await
}
