//! `docker load` tarball layout

use super::tar_writer::TarWriter;
use crate::error::Result;
use crate::image::ImageManifest;
use crate::registry::ImageReference;
use crate::store::{Namespace, Store};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::io::AsyncWrite;

#[derive(Serialize)]
struct TarballManifest {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags")]
    repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

#[derive(Serialize)]
struct LayerJson<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

pub(crate) async fn write<W>(
    store: &dyn Store,
    manifest: &ImageManifest,
    config: &[u8],
    reference: Option<&ImageReference>,
    tar: &mut TarWriter<W>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // "<name>:<tag>"; docker cannot tag by digest
    let repo_tag = match reference {
        Some(r) if r.tag.is_none() && r.digest.is_some() => {
            tracing::warn!(
                reference = %r.canonical_ref(),
                "digest references cannot be loaded as a tag, archive will be untagged"
            );
            None
        }
        Some(r) => Some((
            r.canonical_name(),
            r.tag.clone().unwrap_or_else(|| crate::registry::reference::DEFAULT_TAG.to_string()),
        )),
        None => None,
    };

    let config_path = format!("sha256/{}.json", manifest.config.digest.hex());
    tar.append_bytes(&config_path, config).await?;

    let mut layer_paths = Vec::with_capacity(manifest.layers.len());
    let mut parent: Option<&str> = None;
    for layer in &manifest.layers {
        let id = layer.digest.hex();
        let layer_path = format!("sha256/{}/layer.tar", id);
        let reader = store.get_stream(Namespace::Blob, &layer.digest).await?;
        tar.append_stream(&layer_path, layer.size, reader).await?;
        tar.append_bytes(&format!("sha256/{}/VERSION", id), b"1.0").await?;
        tar.append_json(&format!("sha256/{}/json", id), &LayerJson { id, parent })
            .await?;
        layer_paths.push(layer_path);
        parent = Some(id);
    }

    let tarball_manifest = TarballManifest {
        config: config_path,
        repo_tags: repo_tag
            .iter()
            .map(|(name, tag)| format!("{}:{}", name, tag))
            .collect(),
        layers: layer_paths,
    };
    tar.append_json("manifest.json", &[tarball_manifest]).await?;

    if let Some((name, tag)) = repo_tag {
        let mut tags = BTreeMap::new();
        tags.insert(tag, parent.unwrap_or_default().to_string());
        let mut repositories = BTreeMap::new();
        repositories.insert(name, tags);
        tar.append_json("repositories", &repositories).await?;
    }
    Ok(())
}
