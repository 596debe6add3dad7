//! OCI image data model
//!
//! Descriptors, manifests, indexes, image configs and artifact configs, plus
//! the stable JSON encoding used for every document this crate generates.
//! Generated documents are hashed, so their bytes must not depend on field
//! declaration order or map iteration order.

pub mod artifact;
pub mod config;
pub mod manifest;
pub mod media_types;

pub use artifact::{ArtifactConfig, Importmap};
pub use config::{ConfigWriter, ContainerConfig, History, ImageConfig, RootFs};
pub use manifest::{Annotations, Descriptor, ImageManifest, ManifestIndex, ParsedManifest, Platform};
pub use media_types::ManifestKind;

use crate::error::Result;
use serde::Serialize;

/// Serialize with object keys sorted lexicographically at every depth
pub fn stable_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    // serde_json::Map is BTreeMap-backed, so going through Value sorts keys
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}
