//! End-to-end ejection: pull a base image, then compose the artifact onto it

use super::{Compositor, EjectOptions, EjectRequest};
use crate::digest::Digest;
use crate::error::Result;
use crate::image::manifest::{
    ANNOTATION_BASE_DIGEST, ANNOTATION_BASE_NAME, ANNOTATION_CREATED, ANNOTATION_REVISION,
    ANNOTATION_SOURCE,
};
use crate::image::{Annotations, Descriptor};
use crate::registry::ImageReference;
use crate::store::{RegistryStore, StackedStore, Store, WritablePrecedence};
use crate::transfer::TransferEngine;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;

/// Stores taking part in an ejection
#[derive(Clone)]
pub struct EjectStores {
    /// Holds the built artifact
    pub artifact: Arc<dyn Store>,
    /// Receives the pulled base image
    pub base: Arc<dyn Store>,
    /// Receives the generated config and manifests
    pub staging: Arc<dyn Store>,
}

pub struct EjectedImage {
    pub descriptor: Descriptor,
    /// Read view over staging, artifact and base; everything the ejected
    /// image references can be read from here
    pub store: StackedStore,
}

/// Provenance annotations for an ejected image.
///
/// `env` looks up CI variables: `GITHUB_SHA` becomes the revision and
/// `GITHUB_SERVER_URL` + `GITHUB_REPOSITORY` the source URL.
pub fn provenance_annotations<F>(
    base: &Descriptor,
    base_ref: &ImageReference,
    created: &str,
    env: F,
) -> Annotations
where
    F: Fn(&str) -> Option<String>,
{
    let mut annotations = Annotations::new();
    annotations.insert(ANNOTATION_CREATED.to_string(), created.to_string());
    annotations.insert(ANNOTATION_BASE_DIGEST.to_string(), base.digest.to_string());
    annotations.insert(ANNOTATION_BASE_NAME.to_string(), base_ref.canonical_ref());

    if let Some(sha) = env("GITHUB_SHA") {
        annotations.insert(ANNOTATION_REVISION.to_string(), sha);
    }
    if let (Some(server), Some(repo)) = (env("GITHUB_SERVER_URL"), env("GITHUB_REPOSITORY")) {
        annotations.insert(ANNOTATION_SOURCE.to_string(), format!("{}/{}", server, repo));
    }
    annotations
}

/// Pull `base_ref` from `registry` into the base store and eject
/// `artifact_digest` onto it.
pub async fn eject_artifact(
    engine: &TransferEngine,
    registry: &RegistryStore,
    base_ref: &ImageReference,
    artifact_digest: &Digest,
    stores: EjectStores,
    options: EjectOptions,
) -> Result<EjectedImage> {
    let base = engine
        .pull(registry, &base_ref.reference(), stores.base.as_ref())
        .await?;

    let store = StackedStore::new(
        vec![stores.artifact, stores.base],
        Some(stores.staging),
        WritablePrecedence::First,
    );

    let created = options
        .created
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    let annotations =
        provenance_annotations(&base, base_ref, &created, |key| std::env::var(key).ok());
    let options = EjectOptions {
        created: Some(created),
        ..options
    };

    let descriptor = Compositor::new(&store, &store)
        .with_options(options)
        .eject(EjectRequest {
            base_digest: base.digest.clone(),
            artifact_digest: artifact_digest.clone(),
            annotations,
        })
        .await?;

    tracing::info!(
        base = %base_ref.canonical_ref(),
        artifact = %artifact_digest,
        digest = %descriptor.digest,
        "artifact ejected"
    );
    Ok(EjectedImage { descriptor, store })
}
