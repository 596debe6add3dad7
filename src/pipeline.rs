//! Streaming digest and gzip pipeline
//!
//! ```text
//! input --+--> sha256 ----------------------> uncompressed digest
//!         |
//!         +--> gzip --+--> sha256 ----------> compressed digest
//!                     |
//!                     +--> sink
//! ```
//!
//! The input is read once, in chunks, and every branch sees the same bytes
//! in order. Branches are connected by bounded channels, so a slow sink
//! applies backpressure to the reader. Hashing and I/O are polled together
//! in the calling task; gzip runs on the blocking pool.

use crate::digest::{Digest, Sha256Hasher};
use crate::error::{OciError, Result};
use crate::image::manifest::{ANNOTATION_UNCOMPRESSED_DIGEST, ANNOTATION_UNCOMPRESSED_SIZE};
use crate::image::{Annotations, Descriptor};
use crate::store::{BlobReader, Namespace, Store};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;

const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks in flight per branch
const CHANNEL_DEPTH: usize = 8;

type Chunk = Arc<Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub uncompressed_digest: Digest,
    pub compressed_digest: Digest,
    pub raw_size: u64,
    pub compressed_size: u64,
}

impl PipelineOutput {
    /// Space saved by compression, as a fraction of the raw size
    pub fn ratio(&self) -> f64 {
        if self.raw_size == 0 {
            return 0.0;
        }
        (self.raw_size as f64 - self.compressed_size as f64) / self.raw_size as f64
    }
}

fn branch_closed(branch: &str) -> OciError {
    OciError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("{} branch stopped early", branch),
    ))
}

async fn hash_chunks(mut rx: mpsc::Receiver<Chunk>) -> Result<(Digest, u64)> {
    let mut hasher = Sha256Hasher::new();
    while let Some(chunk) = rx.recv().await {
        hasher.update(&chunk);
    }
    Ok(hasher.finish())
}

/// Called from the blocking compressor thread
fn forward_packed(
    packed: Vec<u8>,
    hash_tx: &mpsc::Sender<Chunk>,
    sink_tx: &mpsc::Sender<Chunk>,
) -> Result<()> {
    if packed.is_empty() {
        return Ok(());
    }
    let packed: Chunk = Arc::new(packed);
    hash_tx
        .blocking_send(packed.clone())
        .map_err(|_| branch_closed("compressed digest"))?;
    sink_tx.blocking_send(packed).map_err(|_| branch_closed("sink"))
}

/// Hash the input, gzip it, hash the gzip output and write it to `sink`,
/// all in one pass.
///
/// The sink is flushed and shut down before returning. On failure the first
/// error wins and the remaining branches are dropped.
pub async fn digest_compress_store<R, W>(input: R, sink: W) -> Result<PipelineOutput>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (raw_tx, raw_rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
    let (gzip_tx, mut gzip_rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
    let (packed_hash_tx, packed_hash_rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
    let (sink_tx, mut sink_rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);

    let read = async move {
        let mut input = input;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            let chunk: Chunk = Arc::new(buffer[..n].to_vec());
            raw_tx.send(chunk.clone()).await.map_err(|_| branch_closed("raw digest"))?;
            gzip_tx.send(chunk).await.map_err(|_| branch_closed("gzip"))?;
        }
        Ok::<_, OciError>(())
    };

    let compressor = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        while let Some(chunk) = gzip_rx.blocking_recv() {
            encoder.write_all(&chunk)?;
            let packed = std::mem::take(encoder.get_mut());
            forward_packed(packed, &packed_hash_tx, &sink_tx)?;
        }
        let tail = encoder.finish()?;
        forward_packed(tail, &packed_hash_tx, &sink_tx)
    });
    let compress = async move { compressor.await? };

    let write = async move {
        let mut sink = sink;
        while let Some(chunk) = sink_rx.recv().await {
            sink.write_all(&chunk).await?;
        }
        sink.flush().await?;
        sink.shutdown().await?;
        Ok::<_, OciError>(())
    };

    let ((), (uncompressed_digest, raw_size), (), (compressed_digest, compressed_size), ()) = tokio::try_join!(
        read,
        hash_chunks(raw_rx),
        compress,
        hash_chunks(packed_hash_rx),
        write,
    )?;

    let output = PipelineOutput {
        uncompressed_digest,
        compressed_digest,
        raw_size,
        compressed_size,
    };
    tracing::debug!(
        raw_size,
        compressed_size,
        ratio = output.ratio(),
        digest = %output.compressed_digest,
        "compressed layer"
    );
    Ok(output)
}

/// Digest and size of the decompressed content of a gzip stream
pub async fn uncompressed_digest(reader: BlobReader) -> Result<(Digest, u64)> {
    // the bridge must be built inside the runtime it blocks on
    let bridge = SyncIoBridge::new(reader);
    tokio::task::spawn_blocking(move || -> Result<(Digest, u64)> {
        let mut decoder = GzDecoder::new(bridge);
        let mut hasher = Sha256Hasher::new();
        std::io::copy(&mut decoder, &mut hasher)?;
        Ok(hasher.finish())
    })
    .await?
}

/// Layer descriptor for pipeline output, remembering the uncompressed digest
/// and size so that later compositions can skip decompression
pub fn descriptor_for_layer(
    output: &PipelineOutput,
    media_type: &str,
    annotations: Annotations,
) -> Descriptor {
    let mut annotations = annotations;
    annotations.insert(
        ANNOTATION_UNCOMPRESSED_DIGEST.to_string(),
        output.uncompressed_digest.to_string(),
    );
    annotations.insert(
        ANNOTATION_UNCOMPRESSED_SIZE.to_string(),
        output.raw_size.to_string(),
    );
    Descriptor {
        annotations: Some(annotations),
        ..Descriptor::new(media_type, output.compressed_digest.clone(), output.compressed_size)
    }
}

/// Compress `input` into a scratch file under `scratch_dir` and store the
/// result as a blob
pub async fn store_layer<R>(
    store: &dyn Store,
    input: R,
    media_type: &str,
    annotations: Annotations,
    scratch_dir: &Path,
) -> Result<Descriptor>
where
    R: AsyncRead + Unpin,
{
    tokio::fs::create_dir_all(scratch_dir).await?;
    let scratch = scratch_dir.join(format!("{}.layer", uuid::Uuid::new_v4()));
    let file = tokio::fs::File::create(&scratch).await?;

    let stored = async {
        let output = digest_compress_store(input, file).await?;
        let descriptor = descriptor_for_layer(&output, media_type, annotations);
        store.put_file(Namespace::Blob, &descriptor, &scratch).await
    }
    .await;

    let _ = tokio::fs::remove_file(&scratch).await;
    stored
}
