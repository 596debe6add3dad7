//! Registry capability and registry-side helpers
//!
//! The HTTP wire client is not part of this crate. Callers hand in an
//! implementation of [`RegistryClient`] bound to one repository; the
//! [`RegistryStore`](crate::store::RegistryStore) adapts it to the
//! [`Store`](crate::store::Store) interface.

pub mod auth;
pub mod reference;

pub use auth::{CredentialSource, DockerConfig, DockerCredential};
pub use reference::ImageReference;

use crate::digest::Digest;
use crate::error::Result;
use crate::image::Descriptor;
use crate::store::BlobReader;
use async_trait::async_trait;

/// A manifest as returned by the registry
#[derive(Debug, Clone)]
pub struct ManifestResponse {
    pub bytes: Vec<u8>,
    /// Server-reported content digest (`Docker-Content-Digest`)
    pub digest: Digest,
    pub media_type: String,
}

/// Manifest metadata from a `HEAD` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHead {
    /// `Docker-Content-Digest`
    pub digest: Digest,
    /// `Content-Length`
    pub size: u64,
    pub media_type: String,
}

/// Registry Distribution API operations for a single repository.
///
/// Implementations report HTTP failures as
/// [`OciError::Transport`](crate::error::OciError::Transport) carrying the
/// status code; a 404 is what callers treat as "absent".
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Canonical `registry/repository` name this client is bound to
    fn repository(&self) -> &str;

    /// Size of a blob, or `None` when the registry does not have it
    async fn head_blob(&self, digest: &Digest) -> Result<Option<u64>>;

    async fn get_blob(&self, digest: &Digest) -> Result<BlobReader>;

    async fn put_blob(&self, descriptor: &Descriptor, reader: BlobReader) -> Result<()>;

    /// Metadata of a manifest by tag or digest, or `None` when the registry
    /// does not have it
    async fn head_manifest(&self, reference: &str) -> Result<Option<ManifestHead>>;

    /// Fetch a manifest by tag or digest
    async fn get_manifest(&self, reference: &str) -> Result<ManifestResponse>;

    /// Upload manifest bytes under a tag or digest, returning the stored digest
    async fn put_manifest(&self, bytes: Vec<u8>, media_type: &str, reference: &str) -> Result<Digest>;
}
