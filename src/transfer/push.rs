use super::{BlobOutcome, TransferEngine, TransferStats};
use crate::digest::Digest;
use crate::error::{OciError, Result};
use crate::image::{Descriptor, ParsedManifest};
use crate::store::{BlobStat, Namespace, RegistryStore, Store, check_existing};
use futures::future::{BoxFuture, FutureExt};

impl TransferEngine {
    /// Push the manifest `manifest_digest` and everything it references from
    /// `source` to `destination`, tagging the top-level manifest `reference`.
    ///
    /// Every manifest and blob in the tree is confirmed present in `source`
    /// before the registry is contacted, so a broken local tree never leaves
    /// a partial upload behind.
    pub async fn push(
        &self,
        source: &dyn Store,
        manifest_digest: &Digest,
        destination: &RegistryStore,
        reference: &str,
    ) -> Result<Digest> {
        self.output.section(&format!(
            "Push {} to {}:{}",
            manifest_digest.short(),
            destination.canonical_name(),
            reference
        ));

        self.verify_source_tree(source, manifest_digest.clone(), None)
            .await?;

        let mut stats = TransferStats::default();
        let pushed = self
            .push_manifest(
                source,
                manifest_digest.clone(),
                None,
                destination,
                reference.to_string(),
                &mut stats,
            )
            .await?;

        self.report_stats("Push complete", &stats);
        self.output.success(&format!("Pushed {}", pushed));
        Ok(pushed)
    }

    fn verify_source_tree<'a>(
        &'a self,
        source: &'a dyn Store,
        digest: Digest,
        media_type: Option<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let bytes = source.get_full(Namespace::Manifest, &digest).await?;
            match ParsedManifest::parse(&bytes, media_type.as_deref(), &digest)? {
                ParsedManifest::Index(index) => {
                    for child in index.manifests {
                        self.verify_source_tree(source, child.digest, Some(child.media_type))
                            .await?;
                    }
                }
                ParsedManifest::Image(manifest) => {
                    for blob in manifest.blobs() {
                        match source.stat(Namespace::Blob, &blob.digest).await? {
                            None => {
                                return Err(OciError::not_found(format!(
                                    "blob {} of manifest {} is missing from '{}'",
                                    blob.digest,
                                    digest,
                                    source.name()
                                )));
                            }
                            existing => {
                                check_existing(Namespace::Blob, &blob.digest, existing, blob.size)?;
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn push_manifest<'a>(
        &'a self,
        source: &'a dyn Store,
        digest: Digest,
        media_type: Option<String>,
        destination: &'a RegistryStore,
        reference: String,
        stats: &'a mut TransferStats,
    ) -> BoxFuture<'a, Result<Digest>> {
        async move {
            let bytes = source.get_full(Namespace::Manifest, &digest).await?;
            let parsed = ParsedManifest::parse(&bytes, media_type.as_deref(), &digest)?;
            let media_type = parsed.media_type().to_string();

            match parsed {
                ParsedManifest::Index(index) => {
                    // children go up by digest so the index never dangles
                    for child in index.manifests {
                        self.output.step(&format!("Pushing child manifest {}", child.digest.short()));
                        let child_ref = child.digest.to_string();
                        self.push_manifest(
                            source,
                            child.digest,
                            Some(child.media_type),
                            destination,
                            child_ref,
                            stats,
                        )
                        .await?;
                    }
                }
                ParsedManifest::Image(manifest) => {
                    for blob in manifest.blobs() {
                        let outcome = self.push_blob(source, blob, destination).await?;
                        stats.record(outcome, blob.size);
                    }
                }
            }

            let pushed = destination
                .put_manifest_ref(bytes, &media_type, &reference)
                .await?;
            stats.manifests_written += 1;
            if pushed != digest {
                tracing::warn!(expected = %digest, actual = %pushed, "registry reported a different manifest digest");
                self.output.warning(&format!(
                    "registry stored {} as {}",
                    digest.short(),
                    pushed.short()
                ));
            }
            Ok(pushed)
        }
        .boxed()
    }

    async fn push_blob(
        &self,
        source: &dyn Store,
        blob: &Descriptor,
        destination: &RegistryStore,
    ) -> Result<BlobOutcome> {
        let task_id = blob.digest.short();
        let existing = destination
            .client()
            .head_blob(&blob.digest)
            .await?
            .map(|size| BlobStat { size });
        if check_existing(Namespace::Blob, &blob.digest, existing, blob.size)? {
            tracing::debug!(digest = %blob.digest, repository = destination.canonical_name(), "blob already on registry");
            self.progress.skipped(task_id, "already on registry");
            return Ok(BlobOutcome::AlreadyPresent);
        }

        self.output.detail(&format!(
            "Uploading {} ({})",
            task_id,
            self.output.format_size(blob.size)
        ));
        let reader = source.get_stream(Namespace::Blob, &blob.digest).await?;
        let reader = self.track(reader, task_id, blob.size);
        let uploaded = destination.client().put_blob(blob, reader).await;
        self.settle(task_id, uploaded)?;
        Ok(BlobOutcome::Transferred)
    }
}
