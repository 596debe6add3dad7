//! Content-addressed stores
//!
//! Every backend implements [`Store`]: two independent keyspaces (blobs and
//! manifests) addressed by [`Digest`], where a write is verified against
//! the content before it becomes visible.
//!
//! Backends:
//! - [`LocalDiskStore`]: `<root>/blobs/sha256/<hex>` and `<root>/manifests/sha256/<hex>`
//! - [`InMemoryStore`]: process-local staging area
//! - [`StackedStore`]: read-through composition of other stores
//! - [`RegistryStore`]: a remote repository behind a [`RegistryClient`](crate::registry::RegistryClient)

pub mod local;
pub mod memory;
pub mod registry;
pub mod stacked;

pub use local::LocalDiskStore;
pub use memory::InMemoryStore;
pub use registry::RegistryStore;
pub use stacked::{StackedStore, WritablePrecedence};

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::{Annotations, Descriptor};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Byte stream handed out by and into stores
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// The two keyspaces of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Blob,
    Manifest,
}

impl Namespace {
    /// Directory name used by on-disk layouts
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Blob => "blobs",
            Namespace::Manifest => "manifests",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Blob => f.write_str("blob"),
            Namespace::Manifest => f.write_str("manifest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStat {
    pub size: u64,
}

/// Descriptor fields a caller knows before the content is hashed
#[derive(Debug, Clone, Default)]
pub struct DescriptorHint {
    pub media_type: String,
    /// Expected digest; the write fails if the content hashes differently
    pub digest: Option<Digest>,
    pub annotations: Option<Annotations>,
}

impl DescriptorHint {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            ..Default::default()
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Hash `data` and build its descriptor, rejecting a mismatched digest
    pub fn resolve(self, ns: Namespace, data: &[u8]) -> Result<Descriptor> {
        let digest = Digest::of_bytes(data);
        if let Some(expected) = &self.digest {
            if *expected != digest {
                return Err(OciError::Integrity(format!(
                    "{} content hashes to {} but {} was declared",
                    ns, digest, expected
                )));
            }
        }
        Ok(Descriptor {
            annotations: self.annotations,
            ..Descriptor::new(self.media_type, digest, data.len() as u64)
        })
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &str;

    /// Store `data`, computing its digest and size
    async fn put_bytes(&self, ns: Namespace, hint: DescriptorHint, data: &[u8]) -> Result<Descriptor>;

    /// Store a stream whose digest and size are already claimed by `descriptor`
    async fn put_stream(
        &self,
        ns: Namespace,
        descriptor: &Descriptor,
        reader: BlobReader,
    ) -> Result<Descriptor>;

    async fn put_file(&self, ns: Namespace, descriptor: &Descriptor, path: &Path) -> Result<Descriptor> {
        let file = tokio::fs::File::open(path).await?;
        self.put_stream(ns, descriptor, Box::new(file)).await
    }

    async fn stat(&self, ns: Namespace, digest: &Digest) -> Result<Option<BlobStat>>;

    async fn get_full(&self, ns: Namespace, digest: &Digest) -> Result<Vec<u8>>;

    async fn get_stream(&self, ns: Namespace, digest: &Digest) -> Result<BlobReader>;

    /// Resolve a tag or digest reference to a manifest descriptor
    async fn describe_ref(&self, reference: &str) -> Result<Descriptor> {
        Err(OciError::Unsupported(format!(
            "store '{}' cannot resolve reference {}",
            self.name(),
            reference
        )))
    }
}

/// Read a whole stream, failing if it does not match `descriptor`
pub(crate) async fn read_verified(
    ns: Namespace,
    descriptor: &Descriptor,
    mut reader: BlobReader,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(descriptor.size.min(64 * 1024 * 1024) as usize);
    reader.read_to_end(&mut data).await?;
    verify_content(ns, descriptor, Digest::of_bytes(&data), data.len() as u64)?;
    Ok(data)
}

/// Compare hashed content against the digest and size it was stored under
pub(crate) fn verify_content(
    ns: Namespace,
    descriptor: &Descriptor,
    digest: Digest,
    size: u64,
) -> Result<()> {
    if size != descriptor.size {
        return Err(OciError::Integrity(format!(
            "{} {} is {} bytes, expected {}",
            ns, descriptor.digest, size, descriptor.size
        )));
    }
    if digest != descriptor.digest {
        return Err(OciError::Integrity(format!(
            "{} content hashes to {} but {} was declared",
            ns, digest, descriptor.digest
        )));
    }
    Ok(())
}

/// Reject a write whose size clashes with content already stored under its digest
pub(crate) fn check_existing(
    ns: Namespace,
    digest: &Digest,
    existing: Option<BlobStat>,
    size: u64,
) -> Result<bool> {
    match existing {
        Some(stat) if stat.size == size => Ok(true),
        Some(stat) => Err(OciError::Integrity(format!(
            "{} {} clashed (stored size {} vs {})",
            ns, digest, stat.size, size
        ))),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_resolve_computes_descriptor() {
        let desc = DescriptorHint::new("text/plain")
            .resolve(Namespace::Blob, b"hello")
            .unwrap();
        assert_eq!(desc.digest, Digest::of_bytes(b"hello"));
        assert_eq!(desc.size, 5);
    }

    #[test]
    fn test_hint_resolve_rejects_wrong_digest() {
        let err = DescriptorHint::new("text/plain")
            .with_digest(Digest::of_bytes(b"other"))
            .resolve(Namespace::Blob, b"hello")
            .unwrap_err();
        assert!(matches!(err, OciError::Integrity(_)));
    }

    #[test]
    fn test_check_existing() {
        let digest = Digest::of_bytes(b"x");
        assert!(!check_existing(Namespace::Blob, &digest, None, 1).unwrap());
        assert!(check_existing(Namespace::Blob, &digest, Some(BlobStat { size: 1 }), 1).unwrap());
        assert!(check_existing(Namespace::Blob, &digest, Some(BlobStat { size: 2 }), 1).is_err());
    }
}
