//! Extract a compressed layer blob onto the local filesystem

use crate::error::{OciError, Result};
use crate::image::{Descriptor, media_types};
use crate::store::{Namespace, Store};
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use tokio_util::io::SyncIoBridge;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: usize,
    pub bytes: u64,
}

/// Decompress the `*.tar+gzip` layer `layer` from `store` into `dest`.
///
/// Entries that would land outside `dest` are skipped.
pub async fn unpack_layer(store: &dyn Store, layer: &Descriptor, dest: &Path) -> Result<UnpackStats> {
    if !media_types::is_gzip_tar_layer(&layer.media_type) {
        return Err(OciError::unsupported_media_type(
            layer.media_type.clone(),
            &layer.digest,
        ));
    }

    tokio::fs::create_dir_all(dest).await?;
    let reader = store.get_stream(Namespace::Blob, &layer.digest).await?;
    // the bridge must be built inside the runtime it blocks on
    let bridge = SyncIoBridge::new(reader);
    let dest: PathBuf = dest.to_path_buf();

    let stats = tokio::task::spawn_blocking(move || -> Result<UnpackStats> {
        let mut archive = tar::Archive::new(GzDecoder::new(bridge));
        let mut stats = UnpackStats::default();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let size = entry.header().size()?;
            let is_file = entry.header().entry_type().is_file();
            if !entry.unpack_in(&dest)? {
                tracing::warn!(path = %entry.path()?.display(), "skipping entry outside destination");
                continue;
            }
            if is_file {
                stats.files += 1;
                stats.bytes += size;
            }
        }
        Ok(stats)
    })
    .await??;

    tracing::debug!(digest = %layer.digest, files = stats.files, bytes = stats.bytes, "unpacked layer");
    Ok(stats)
}
