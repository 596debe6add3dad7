//! In-memory store for generated content that should never touch disk

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::Descriptor;
use crate::store::{
    BlobReader, BlobStat, DescriptorHint, Namespace, Store, check_existing, read_verified,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<(Namespace, Digest), Arc<Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across both keyspaces
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup(&self, ns: Namespace, digest: &Digest) -> Result<Arc<Vec<u8>>> {
        self.entries
            .read()
            .get(&(ns, digest.clone()))
            .cloned()
            .ok_or_else(|| OciError::not_found(format!("in-memory {} {} not found", ns, digest)))
    }

    fn insert(&self, ns: Namespace, descriptor: &Descriptor, data: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.write();
        let key = (ns, descriptor.digest.clone());
        let existing = entries.get(&key).map(|d| BlobStat { size: d.len() as u64 });
        if !check_existing(ns, &descriptor.digest, existing, descriptor.size)? {
            entries.insert(key, Arc::new(data));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn put_bytes(&self, ns: Namespace, hint: DescriptorHint, data: &[u8]) -> Result<Descriptor> {
        let descriptor = hint.resolve(ns, data)?;
        self.insert(ns, &descriptor, data.to_vec())?;
        Ok(descriptor)
    }

    async fn put_stream(
        &self,
        ns: Namespace,
        descriptor: &Descriptor,
        reader: BlobReader,
    ) -> Result<Descriptor> {
        let existing = self.stat(ns, &descriptor.digest).await?;
        if check_existing(ns, &descriptor.digest, existing, descriptor.size)? {
            return Ok(descriptor.clone());
        }
        let data = read_verified(ns, descriptor, reader).await?;
        self.insert(ns, descriptor, data)?;
        Ok(descriptor.clone())
    }

    async fn stat(&self, ns: Namespace, digest: &Digest) -> Result<Option<BlobStat>> {
        Ok(self
            .entries
            .read()
            .get(&(ns, digest.clone()))
            .map(|d| BlobStat { size: d.len() as u64 }))
    }

    async fn get_full(&self, ns: Namespace, digest: &Digest) -> Result<Vec<u8>> {
        Ok(self.lookup(ns, digest)?.as_ref().clone())
    }

    async fn get_stream(&self, ns: Namespace, digest: &Digest) -> Result<BlobReader> {
        let data = self.lookup(ns, digest)?;
        Ok(Box::new(Cursor::new(SharedBytes(data))))
    }
}

/// Cheap handle onto stored bytes for streaming reads
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}
