use super::{BlobOutcome, TransferEngine, TransferStats};
use crate::error::Result;
use crate::image::manifest::ANNOTATION_ORIGIN;
use crate::image::{Annotations, Descriptor, ParsedManifest};
use crate::store::{DescriptorHint, Namespace, RegistryStore, Store, check_existing};
use futures::future::{BoxFuture, FutureExt};

impl TransferEngine {
    /// Pull `reference` and everything it points to from `source` into `target`.
    ///
    /// Returns the descriptor of the stored top-level manifest, annotated
    /// with the repository it came from.
    pub async fn pull(
        &self,
        source: &RegistryStore,
        reference: &str,
        target: &dyn Store,
    ) -> Result<Descriptor> {
        self.output
            .section(&format!("Pull {}:{}", source.canonical_name(), reference));

        let descriptor = source.describe_ref(reference).await?;
        tracing::info!(reference, digest = %descriptor.digest, media_type = %descriptor.media_type, "resolved pull reference");

        let mut stats = TransferStats::default();
        let stored = self
            .pull_manifest(source, descriptor, target, &mut stats)
            .await?;

        self.report_stats("Pull complete", &stats);
        self.output.success(&format!("Pulled {}", stored.digest));
        Ok(stored)
    }

    fn pull_manifest<'a>(
        &'a self,
        source: &'a RegistryStore,
        descriptor: Descriptor,
        target: &'a dyn Store,
        stats: &'a mut TransferStats,
    ) -> BoxFuture<'a, Result<Descriptor>> {
        async move {
            let bytes = source.get_full(Namespace::Manifest, &descriptor.digest).await?;

            match ParsedManifest::parse(&bytes, Some(&descriptor.media_type), &descriptor.digest)? {
                ParsedManifest::Index(index) => {
                    tracing::info!(
                        digest = %descriptor.digest,
                        children = index.manifests.len(),
                        "pulling manifest index"
                    );
                    self.output.info(&format!(
                        "{} is an index of {} manifests",
                        descriptor.digest.short(),
                        index.manifests.len()
                    ));
                    for child in index.manifests {
                        self.pull_manifest(source, child, target, stats).await?;
                    }
                }
                ParsedManifest::Image(manifest) => {
                    for blob in manifest.blobs() {
                        let outcome = self.pull_blob(source, blob, target).await?;
                        stats.record(outcome, blob.size);
                    }
                }
            }

            let mut provenance = Annotations::new();
            provenance.insert(ANNOTATION_ORIGIN.to_string(), source.canonical_name().to_string());
            let stored = target
                .put_bytes(
                    Namespace::Manifest,
                    DescriptorHint::new(descriptor.media_type.clone())
                        .with_digest(descriptor.digest.clone())
                        .with_annotations(provenance),
                    &bytes,
                )
                .await?;
            stats.manifests_written += 1;
            Ok(stored)
        }
        .boxed()
    }

    async fn pull_blob(
        &self,
        source: &RegistryStore,
        blob: &Descriptor,
        target: &dyn Store,
    ) -> Result<BlobOutcome> {
        let task_id = blob.digest.short();
        let existing = target.stat(Namespace::Blob, &blob.digest).await?;
        if check_existing(Namespace::Blob, &blob.digest, existing, blob.size)? {
            tracing::debug!(digest = %blob.digest, store = target.name(), "blob already present");
            self.progress.skipped(task_id, "already present");
            return Ok(BlobOutcome::AlreadyPresent);
        }

        self.output.detail(&format!(
            "Downloading {} ({})",
            task_id,
            self.output.format_size(blob.size)
        ));
        let reader = source.get_stream(Namespace::Blob, &blob.digest).await?;
        let reader = self.track(reader, task_id, blob.size);
        let stored = target.put_stream(Namespace::Blob, blob, reader).await;
        self.settle(task_id, stored)?;
        Ok(BlobOutcome::Transferred)
    }
}
