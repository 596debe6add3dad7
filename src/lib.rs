//! OCI Ejector Library
//!
//! Content-addressed storage, registry transfer and recomposition of OCI and
//! Docker images:
//!
//! - [`store`]: the [`Store`] trait and its local-disk, in-memory, stacked
//!   and registry backends
//! - [`pipeline`]: single-pass digest + gzip pipeline for new layer content
//! - [`transfer`]: pull and push with multi-platform recursion and dedup
//! - [`compose`]: ejects an artifact's layers onto a base image
//! - [`archive`]: `docker load` and OCI Image Layout tarballs

pub mod archive;
pub mod compose;
pub mod config;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod store;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::{ArchiveFormat, ExportOptions, export_archive, unpack_layer};
pub use compose::{Compositor, EjectOptions, EjectRequest, eject_artifact};
pub use config::StorageConfig;
pub use digest::Digest;
pub use error::{OciError, Result};
pub use image::{Descriptor, ImageManifest, ManifestIndex};
pub use logging::Logger;
pub use registry::{ImageReference, ManifestHead, ManifestResponse, RegistryClient};
pub use store::{
    InMemoryStore, LocalDiskStore, Namespace, RegistryStore, StackedStore, Store,
    WritablePrecedence,
};
pub use transfer::TransferEngine;
