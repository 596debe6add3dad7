//! Read-through composition of several stores
//!
//! Reads probe the configured backends strictly in order and return the
//! first hit. Writes go to the single writable backend, if there is one.

use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::Descriptor;
use crate::store::{BlobReader, BlobStat, DescriptorHint, Namespace, Store};
use async_trait::async_trait;
use std::sync::Arc;

/// Where the writable backend sits in the probe order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritablePrecedence {
    /// Freshly written content shadows the readable backends
    #[default]
    First,
    /// Readable backends are consulted before the writable one
    Last,
}

pub struct StackedStore {
    name: String,
    writable: Option<Arc<dyn Store>>,
    /// Probe order, writable included
    probe: Vec<Arc<dyn Store>>,
}

impl StackedStore {
    pub fn new(
        readable: Vec<Arc<dyn Store>>,
        writable: Option<Arc<dyn Store>>,
        precedence: WritablePrecedence,
    ) -> Self {
        let mut probe = Vec::with_capacity(readable.len() + 1);
        if let (Some(w), WritablePrecedence::First) = (&writable, precedence) {
            probe.push(w.clone());
        }
        probe.extend(readable);
        if let (Some(w), WritablePrecedence::Last) = (&writable, precedence) {
            probe.push(w.clone());
        }

        let name = format!(
            "stacked[{}]",
            probe.iter().map(|s| s.name()).collect::<Vec<_>>().join(",")
        );
        Self {
            name,
            writable,
            probe,
        }
    }

    /// Read-only stack; every put fails with `Unsupported`
    pub fn read_only(readable: Vec<Arc<dyn Store>>) -> Self {
        Self::new(readable, None, WritablePrecedence::default())
    }

    fn writable(&self) -> Result<&Arc<dyn Store>> {
        self.writable.as_ref().ok_or_else(|| {
            OciError::Unsupported(format!("{} has no writable backend", self.name))
        })
    }
}

#[async_trait]
impl Store for StackedStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_bytes(&self, ns: Namespace, hint: DescriptorHint, data: &[u8]) -> Result<Descriptor> {
        self.writable()?.put_bytes(ns, hint, data).await
    }

    async fn put_stream(
        &self,
        ns: Namespace,
        descriptor: &Descriptor,
        reader: BlobReader,
    ) -> Result<Descriptor> {
        self.writable()?.put_stream(ns, descriptor, reader).await
    }

    async fn stat(&self, ns: Namespace, digest: &Digest) -> Result<Option<BlobStat>> {
        for store in &self.probe {
            if let Some(stat) = store.stat(ns, digest).await? {
                return Ok(Some(stat));
            }
        }
        Ok(None)
    }

    async fn get_full(&self, ns: Namespace, digest: &Digest) -> Result<Vec<u8>> {
        for store in &self.probe {
            match store.get_full(ns, digest).await {
                Err(err) if err.is_not_found() => continue,
                other => return other,
            }
        }
        Err(OciError::not_found(format!("{} {} not found in {}", ns, digest, self.name)))
    }

    async fn get_stream(&self, ns: Namespace, digest: &Digest) -> Result<BlobReader> {
        for store in &self.probe {
            match store.get_stream(ns, digest).await {
                Err(err) if err.is_not_found() => {
                    tracing::trace!(store = store.name(), %ns, %digest, "miss, probing next");
                }
                other => return other,
            }
        }
        Err(OciError::not_found(format!("{} {} not found in {}", ns, digest, self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    const MEDIA: &str = "application/octet-stream";

    /// Store whose reads always fail with a non-404 error
    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn put_bytes(&self, _: Namespace, _: DescriptorHint, _: &[u8]) -> Result<Descriptor> {
            Err(OciError::transport(Some(500), "boom"))
        }
        async fn put_stream(&self, _: Namespace, _: &Descriptor, _: BlobReader) -> Result<Descriptor> {
            Err(OciError::transport(Some(500), "boom"))
        }
        async fn stat(&self, _: Namespace, _: &Digest) -> Result<Option<BlobStat>> {
            Err(OciError::transport(Some(500), "boom"))
        }
        async fn get_full(&self, _: Namespace, _: &Digest) -> Result<Vec<u8>> {
            Err(OciError::transport(Some(500), "boom"))
        }
        async fn get_stream(&self, _: Namespace, _: &Digest) -> Result<BlobReader> {
            Err(OciError::transport(Some(500), "boom"))
        }
    }

    async fn seed(store: &InMemoryStore, data: &[u8]) -> Digest {
        store
            .put_bytes(Namespace::Blob, DescriptorHint::new(MEDIA), data)
            .await
            .unwrap()
            .digest
    }

    #[tokio::test]
    async fn test_reads_fall_through_in_order() {
        let upper = Arc::new(InMemoryStore::new());
        let lower = Arc::new(InMemoryStore::new());
        let only_lower = seed(&lower, b"lower").await;
        let both = seed(&upper, b"shared").await;
        seed(&lower, b"shared").await;

        let stack = StackedStore::read_only(vec![upper as Arc<dyn Store>, lower as Arc<dyn Store>]);
        assert_eq!(stack.get_full(Namespace::Blob, &only_lower).await.unwrap(), b"lower");
        assert_eq!(stack.get_full(Namespace::Blob, &both).await.unwrap(), b"shared");
        assert_eq!(stack.stat(Namespace::Blob, &only_lower).await.unwrap(), Some(BlobStat { size: 5 }));

        let missing = Digest::of_bytes(b"missing");
        assert_eq!(stack.stat(Namespace::Blob, &missing).await.unwrap(), None);
        assert!(stack.get_full(Namespace::Blob, &missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_only_stack_rejects_puts() {
        let empty: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let stack = StackedStore::read_only(vec![empty]);
        let err = stack
            .put_bytes(Namespace::Blob, DescriptorHint::new(MEDIA), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, OciError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_puts_reach_only_the_writable() {
        let readable = Arc::new(InMemoryStore::new());
        let writable = Arc::new(InMemoryStore::new());
        let stack = StackedStore::new(
            vec![readable.clone() as Arc<dyn Store>],
            Some(writable.clone() as Arc<dyn Store>),
            WritablePrecedence::First,
        );
        let desc = stack
            .put_bytes(Namespace::Manifest, DescriptorHint::new(MEDIA), b"{}")
            .await
            .unwrap();
        assert!(readable.is_empty());
        assert!(writable.stat(Namespace::Manifest, &desc.digest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_writable_first_is_probed_before_readable() {
        let readable: Arc<dyn Store> = Arc::new(BrokenStore);
        let writable = Arc::new(InMemoryStore::new());
        let digest = seed(&writable, b"fresh").await;

        // the broken readable is never reached because the writable answers first
        let stack = StackedStore::new(vec![readable], Some(writable as Arc<dyn Store>), WritablePrecedence::First);
        assert_eq!(stack.get_full(Namespace::Blob, &digest).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_writable_last_is_probed_after_readable() {
        let readable: Arc<dyn Store> = Arc::new(BrokenStore);
        let writable = Arc::new(InMemoryStore::new());
        let digest = seed(&writable, b"fresh").await;

        // the readable goes first and its non-404 failure propagates
        let stack = StackedStore::new(vec![readable], Some(writable as Arc<dyn Store>), WritablePrecedence::Last);
        let err = stack.get_full(Namespace::Blob, &digest).await.unwrap_err();
        assert!(matches!(err, OciError::Transport { status: Some(500), .. }));
        assert!(stack.stat(Namespace::Blob, &digest).await.is_err());
    }

    #[tokio::test]
    async fn test_writable_last_serves_when_readable_misses() {
        let readable = Arc::new(InMemoryStore::new());
        let writable = Arc::new(InMemoryStore::new());
        let digest = seed(&writable, b"fresh").await;

        let stack = StackedStore::new(
            vec![readable as Arc<dyn Store>],
            Some(writable as Arc<dyn Store>),
            WritablePrecedence::Last,
        );
        assert_eq!(stack.get_full(Namespace::Blob, &digest).await.unwrap(), b"fresh");
        assert!(stack.name().starts_with("stacked["));
    }
}
