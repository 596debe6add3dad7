//! Store view over one remote repository

use crate::digest::Digest;
use crate::error::{OciError, Result, absent_if_not_found};
use crate::image::Descriptor;
use crate::registry::{ManifestResponse, RegistryClient};
use crate::store::{
    BlobReader, BlobStat, DescriptorHint, Namespace, Store, check_existing, read_verified,
};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Clone)]
pub struct RegistryStore {
    client: Arc<dyn RegistryClient>,
}

impl RegistryStore {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn RegistryClient> {
        &self.client
    }

    /// Canonical repository name, recorded as provenance on pulled manifests
    pub fn canonical_name(&self) -> &str {
        self.client.repository()
    }

    /// Upload manifest bytes under a tag or digest
    pub async fn put_manifest_ref(
        &self,
        bytes: Vec<u8>,
        media_type: &str,
        reference: &str,
    ) -> Result<Digest> {
        let digest = self.client.put_manifest(bytes, media_type, reference).await?;
        tracing::info!(repository = self.canonical_name(), reference, %digest, "manifest uploaded");
        Ok(digest)
    }

    /// Fetch a manifest by digest, checking the body against it
    async fn fetch_manifest(&self, digest: &Digest) -> Result<ManifestResponse> {
        let response = self.client.get_manifest(digest.as_str()).await?;
        let actual = Digest::of_bytes(&response.bytes);
        if actual != *digest {
            return Err(OciError::Integrity(format!(
                "registry returned manifest {} when asked for {}",
                actual, digest
            )));
        }
        Ok(response)
    }

    async fn upload_manifest(&self, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        let stored = self
            .client
            .put_manifest(bytes, &descriptor.media_type, descriptor.digest.as_str())
            .await?;
        if stored != descriptor.digest {
            return Err(OciError::Integrity(format!(
                "registry stored manifest as {} instead of {}",
                stored, descriptor.digest
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for RegistryStore {
    fn name(&self) -> &str {
        self.client.repository()
    }

    async fn put_bytes(&self, ns: Namespace, hint: DescriptorHint, data: &[u8]) -> Result<Descriptor> {
        let descriptor = hint.resolve(ns, data)?;
        match ns {
            Namespace::Manifest => self.upload_manifest(&descriptor, data.to_vec()).await?,
            Namespace::Blob => {
                let existing = self.stat(ns, &descriptor.digest).await?;
                if !check_existing(ns, &descriptor.digest, existing, descriptor.size)? {
                    self.client
                        .put_blob(&descriptor, Box::new(Cursor::new(data.to_vec())))
                        .await?;
                }
            }
        }
        Ok(descriptor)
    }

    async fn put_stream(
        &self,
        ns: Namespace,
        descriptor: &Descriptor,
        reader: BlobReader,
    ) -> Result<Descriptor> {
        match ns {
            Namespace::Manifest => {
                let bytes = read_verified(ns, descriptor, reader).await?;
                self.upload_manifest(descriptor, bytes).await?;
            }
            Namespace::Blob => {
                let existing = self.stat(ns, &descriptor.digest).await?;
                if check_existing(ns, &descriptor.digest, existing, descriptor.size)? {
                    tracing::debug!(repository = self.canonical_name(), digest = %descriptor.digest, "blob already present");
                } else {
                    // the registry verifies the digest on upload completion
                    self.client.put_blob(descriptor, reader).await?;
                }
            }
        }
        Ok(descriptor.clone())
    }

    async fn stat(&self, ns: Namespace, digest: &Digest) -> Result<Option<BlobStat>> {
        match ns {
            Namespace::Blob => Ok(self
                .client
                .head_blob(digest)
                .await?
                .map(|size| BlobStat { size })),
            Namespace::Manifest => {
                let head = absent_if_not_found(self.client.head_manifest(digest.as_str()).await)?;
                Ok(head.flatten().map(|h| BlobStat { size: h.size }))
            }
        }
    }

    async fn get_full(&self, ns: Namespace, digest: &Digest) -> Result<Vec<u8>> {
        match ns {
            Namespace::Manifest => Ok(self.fetch_manifest(digest).await?.bytes),
            Namespace::Blob => {
                let mut data = Vec::new();
                let mut reader = self.client.get_blob(digest).await?;
                tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut data).await?;
                if Digest::of_bytes(&data) != *digest {
                    return Err(OciError::Integrity(format!(
                        "blob {} from {} failed verification",
                        digest,
                        self.canonical_name()
                    )));
                }
                Ok(data)
            }
        }
    }

    async fn get_stream(&self, ns: Namespace, digest: &Digest) -> Result<BlobReader> {
        match ns {
            Namespace::Blob => self.client.get_blob(digest).await,
            Namespace::Manifest => {
                let response = self.fetch_manifest(digest).await?;
                Ok(Box::new(Cursor::new(response.bytes)))
            }
        }
    }

    /// The server's content digest is authoritative for the descriptor
    async fn describe_ref(&self, reference: &str) -> Result<Descriptor> {
        let response = self.client.get_manifest(reference).await?;
        tracing::debug!(
            repository = self.canonical_name(),
            reference,
            digest = %response.digest,
            media_type = %response.media_type,
            "resolved reference"
        );
        Ok(Descriptor::new(
            response.media_type,
            response.digest,
            response.bytes.len() as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRegistry;
    use crate::image::media_types;

    #[tokio::test]
    async fn test_stat_translates_absence() {
        let registry = FakeRegistry::new("example.com/app");
        let store = RegistryStore::new(registry.clone());
        let digest = registry.add_blob(b"layer");

        assert_eq!(store.stat(Namespace::Blob, &digest).await.unwrap(), Some(BlobStat { size: 5 }));
        let missing = Digest::of_bytes(b"missing");
        assert_eq!(store.stat(Namespace::Blob, &missing).await.unwrap(), None);
        assert_eq!(store.stat(Namespace::Manifest, &missing).await.unwrap(), None);
        assert!(store.get_full(Namespace::Manifest, &missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_describe_ref_uses_server_digest() {
        let registry = FakeRegistry::new("example.com/app");
        let bytes = br#"{"schemaVersion":2,"layers":[]}"#;
        let digest = registry.add_manifest(media_types::OCI_MANIFEST_V1, bytes, Some("v1"));
        let store = RegistryStore::new(registry);

        let desc = store.describe_ref("v1").await.unwrap();
        assert_eq!(desc.digest, digest);
        assert_eq!(desc.size, bytes.len() as u64);
        assert_eq!(desc.media_type, media_types::OCI_MANIFEST_V1);
        assert_eq!(store.get_full(Namespace::Manifest, &digest).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_manifest_stat_does_not_download() {
        let registry = FakeRegistry::new("example.com/app");
        let bytes = br#"{"schemaVersion":2,"layers":[]}"#;
        let digest = registry.add_manifest(media_types::OCI_MANIFEST_V1, bytes, None);
        let store = RegistryStore::new(registry.clone());

        let stat = store.stat(Namespace::Manifest, &digest).await.unwrap();
        assert_eq!(stat, Some(BlobStat { size: bytes.len() as u64 }));
        assert_eq!(registry.manifest_gets(), 0);
    }

    #[tokio::test]
    async fn test_blob_put_skips_present_blob() {
        let registry = FakeRegistry::new("example.com/app");
        let store = RegistryStore::new(registry.clone());
        for _ in 0..2 {
            store
                .put_bytes(Namespace::Blob, DescriptorHint::new("application/octet-stream"), b"blob")
                .await
                .unwrap();
        }
        assert_eq!(registry.uploads(), 1);
    }

    #[tokio::test]
    async fn test_other_transport_errors_propagate() {
        struct Failing;

        #[async_trait]
        impl RegistryClient for Failing {
            fn repository(&self) -> &str {
                "example.com/down"
            }
            async fn head_blob(&self, _: &Digest) -> Result<Option<u64>> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
            async fn get_blob(&self, _: &Digest) -> Result<BlobReader> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
            async fn put_blob(&self, _: &Descriptor, _: BlobReader) -> Result<()> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
            async fn head_manifest(&self, _: &str) -> Result<Option<crate::registry::ManifestHead>> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
            async fn get_manifest(&self, _: &str) -> Result<ManifestResponse> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
            async fn put_manifest(&self, _: Vec<u8>, _: &str, _: &str) -> Result<Digest> {
                Err(OciError::transport(Some(503), "unavailable"))
            }
        }

        let store = RegistryStore::new(Arc::new(Failing));
        let digest = Digest::of_bytes(b"x");
        let err = store.stat(Namespace::Manifest, &digest).await.unwrap_err();
        assert!(matches!(err, OciError::Transport { status: Some(503), .. }));
        assert!(store.stat(Namespace::Blob, &digest).await.is_err());
    }
}
