//! OCI Image Layout tarball

use super::tar_writer::TarWriter;
use crate::digest::Digest;
use crate::error::Result;
use crate::image::manifest::ANNOTATION_REF_NAME;
use crate::image::{Descriptor, ImageManifest, ManifestIndex};
use crate::registry::ImageReference;
use crate::store::{Namespace, Store};
use tokio::io::AsyncWrite;

const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

fn blob_path(digest: &Digest) -> String {
    format!("blobs/{}/{}", digest.algorithm(), digest.hex())
}

pub(crate) async fn write<W>(
    store: &dyn Store,
    manifest_descriptor: &Descriptor,
    manifest_bytes: &[u8],
    manifest: &ImageManifest,
    config: &[u8],
    reference: Option<&ImageReference>,
    tar: &mut TarWriter<W>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tar.append_json(
        "oci-layout",
        &serde_json::json!({ "imageLayoutVersion": IMAGE_LAYOUT_VERSION }),
    )
    .await?;

    let mut entry = Descriptor::new(
        manifest_descriptor.media_type.clone(),
        manifest_descriptor.digest.clone(),
        manifest_descriptor.size,
    );
    if let Some(reference) = reference {
        entry = entry.with_annotation(ANNOTATION_REF_NAME, reference.canonical_ref());
    }
    tar.append_json("index.json", &ManifestIndex::new(vec![entry]))
        .await?;

    tar.append_bytes(&blob_path(&manifest_descriptor.digest), manifest_bytes)
        .await?;
    tar.append_bytes(&blob_path(&manifest.config.digest), config)
        .await?;
    for layer in &manifest.layers {
        let reader = store.get_stream(Namespace::Blob, &layer.digest).await?;
        tar.append_stream(&blob_path(&layer.digest), layer.size, reader)
            .await?;
    }
    Ok(())
}
