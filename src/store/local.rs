//! Local on-disk store
//!
//! Layout under each root:
//! ```text
//! <root>/
//!   blobs/sha256/<hex>
//!   manifests/sha256/<hex>
//!   tmp/            staging area for in-flight writes
//! ```
//!
//! Writes land in `tmp/` first and are renamed into place only after the
//! content has been verified, so a reader never observes a partial blob.
//! Concurrent writers of one digest race harmlessly: both rename identical
//! bytes onto the same path.

use crate::digest::{Digest, Sha256Hasher};
use crate::error::{OciError, Result};
use crate::image::Descriptor;
use crate::store::{
    BlobReader, BlobStat, DescriptorHint, Namespace, Store, check_existing, verify_content,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const STAGING_DIR: &str = "tmp";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    identifier: String,
    root: PathBuf,
}

impl LocalDiskStore {
    /// Open (creating if needed) the store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let identifier = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string());

        for ns in [Namespace::Blob, Namespace::Manifest] {
            fs::create_dir_all(root.join(ns.dir_name()).join(crate::digest::SHA256_PREFIX)).await?;
        }
        fs::create_dir_all(root.join(STAGING_DIR)).await?;

        tracing::debug!(root = %root.display(), "opened local store");
        Ok(Self { identifier, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a blob or manifest
    pub fn path_for(&self, ns: Namespace, digest: &Digest) -> PathBuf {
        self.root
            .join(ns.dir_name())
            .join(digest.algorithm())
            .join(digest.hex())
    }

    fn staging_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{}.partial", uuid::Uuid::new_v4()))
    }

    async fn commit(&self, staged: &Path, ns: Namespace, digest: &Digest) -> Result<()> {
        let target = self.path_for(ns, digest);
        if let Err(err) = fs::rename(staged, &target).await {
            let _ = fs::remove_file(staged).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn write_staged(&self, data: &[u8]) -> Result<PathBuf> {
        let staged = self.staging_path();
        let mut file = fs::File::create(&staged).await?;
        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&staged).await;
            return Err(err.into());
        }
        Ok(staged)
    }

    /// Copy `reader` into a staging file, returning its digest and size
    async fn stream_staged(&self, staged: &Path, mut reader: BlobReader) -> Result<(Digest, u64)> {
        let mut file = fs::File::create(staged).await?;
        let mut hasher = Sha256Hasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n]).await?;
        }
        file.sync_all().await?;
        Ok(hasher.finish())
    }
}

#[async_trait]
impl Store for LocalDiskStore {
    fn name(&self) -> &str {
        &self.identifier
    }

    async fn put_bytes(&self, ns: Namespace, hint: DescriptorHint, data: &[u8]) -> Result<Descriptor> {
        let descriptor = hint.resolve(ns, data)?;
        let existing = self.stat(ns, &descriptor.digest).await?;
        if check_existing(ns, &descriptor.digest, existing, descriptor.size)? {
            tracing::debug!(store = %self.identifier, %ns, digest = %descriptor.digest, "already stored");
            return Ok(descriptor);
        }

        let staged = self.write_staged(data).await?;
        self.commit(&staged, ns, &descriptor.digest).await?;
        tracing::debug!(store = %self.identifier, %ns, digest = %descriptor.digest, size = descriptor.size, "stored");
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
            tracing::debug!(store = %self.identifier, %ns, digest = %descriptor.digest, "already stored");
            return Ok(descriptor.clone());
        }

        let staged = self.staging_path();
        let verified = match self.stream_staged(&staged, reader).await {
            Ok((digest, size)) => verify_content(ns, descriptor, digest, size),
            Err(err) => Err(err),
        };
        if let Err(err) = verified {
            let _ = fs::remove_file(&staged).await;
            return Err(err);
        }

        self.commit(&staged, ns, &descriptor.digest).await?;
        tracing::debug!(store = %self.identifier, %ns, digest = %descriptor.digest, size = descriptor.size, "stored stream");
        Ok(descriptor.clone())
    }

    async fn stat(&self, ns: Namespace, digest: &Digest) -> Result<Option<BlobStat>> {
        match fs::metadata(self.path_for(ns, digest)).await {
            Ok(meta) => Ok(Some(BlobStat { size: meta.len() })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Whole-object reads are hashed; a file altered on disk is an Integrity error
    async fn get_full(&self, ns: Namespace, digest: &Digest) -> Result<Vec<u8>> {
        let data = fs::read(self.path_for(ns, digest))
            .await
            .map_err(|err| self.map_missing(err, ns, digest))?;
        let actual = Digest::of_bytes(&data);
        if actual != *digest {
            return Err(OciError::Integrity(format!(
                "local {} {} in '{}' hashes to {}",
                ns, digest, self.identifier, actual
            )));
        }
        Ok(data)
    }

    async fn get_stream(&self, ns: Namespace, digest: &Digest) -> Result<BlobReader> {
        let file = fs::File::open(self.path_for(ns, digest))
            .await
            .map_err(|err| self.map_missing(err, ns, digest))?;
        Ok(Box::new(file))
    }
}

impl LocalDiskStore {
    fn map_missing(&self, err: std::io::Error, ns: Namespace, digest: &Digest) -> OciError {
        if err.kind() == ErrorKind::NotFound {
            OciError::not_found(format!(
                "local {} {} not found in '{}'",
                ns, digest, self.identifier
            ))
        } else {
            err.into()
        }
    }
}
