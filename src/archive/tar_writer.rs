//! Streaming ustar writer with fixed metadata
//!
//! Every entry is a read-only regular file owned by root with mtime 0, so
//! writing the same entries twice yields identical bytes.

use crate::error::{OciError, Result};
use crate::image::stable_json;
use crate::store::BlobReader;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BLOCK_SIZE: u64 = 512;
const ENTRY_MODE: u32 = 0o444;

pub(crate) struct TarWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> TarWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn append_bytes(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.write_header(path, data.len() as u64).await?;
        self.inner.write_all(data).await?;
        self.pad(data.len() as u64).await
    }

    pub async fn append_json<T: Serialize>(&mut self, path: &str, value: &T) -> Result<()> {
        self.append_bytes(path, &stable_json(value)?).await
    }

    /// Copy exactly `size` bytes from `reader`; a stream of any other
    /// length fails with `Integrity`
    pub async fn append_stream(&mut self, path: &str, size: u64, mut reader: BlobReader) -> Result<()> {
        self.write_header(path, size).await?;
        let copied = tokio::io::copy(&mut (&mut reader).take(size), &mut self.inner).await?;
        if copied != size {
            return Err(OciError::Integrity(format!(
                "{} ended after {} of {} bytes",
                path, copied, size
            )));
        }
        let mut probe = [0u8; 1];
        if reader.read(&mut probe).await? != 0 {
            return Err(OciError::Integrity(format!(
                "{} is longer than its declared {} bytes",
                path, size
            )));
        }
        self.pad(size).await
    }

    /// Write the end-of-archive marker and hand back the writer
    pub async fn finish(mut self) -> Result<W> {
        self.inner.write_all(&[0u8; 2 * BLOCK_SIZE as usize]).await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }

    async fn write_header(&mut self, path: &str, size: u64) -> Result<()> {
        let mut header = tar::Header::new_ustar();
        header.set_path(path)?;
        header.set_size(size);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        self.inner.write_all(header.as_bytes()).await?;
        Ok(())
    }

    async fn pad(&mut self, size: u64) -> Result<()> {
        let remainder = size % BLOCK_SIZE;
        if remainder != 0 {
            let padding = vec![0u8; (BLOCK_SIZE - remainder) as usize];
            self.inner.write_all(&padding).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[tokio::test]
    async fn test_entries_are_readable_with_fixed_metadata() {
        let mut writer = TarWriter::new(Vec::new());
        writer.append_bytes("VERSION", b"1.0").await.unwrap();
        writer
            .append_stream("blob", 600, Box::new(Cursor::new(vec![7u8; 600])))
            .await
            .unwrap();
        let bytes = writer.finish().await.unwrap();
        assert_eq!(bytes.len() % 512, 0);

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert_eq!(entry.header().mode().unwrap(), 0o444);
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().uid().unwrap(), 0);
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            seen.push((entry.path().unwrap().display().to_string(), data.len()));
        }
        assert_eq!(seen, vec![("VERSION".to_string(), 3), ("blob".to_string(), 600)]);
    }

    #[tokio::test]
    async fn test_stream_length_must_match() {
        let mut writer = TarWriter::new(Vec::new());
        let short = writer
            .append_stream("short", 10, Box::new(Cursor::new(vec![0u8; 4])))
            .await
            .unwrap_err();
        assert!(matches!(short, OciError::Integrity(_)));

        let mut writer = TarWriter::new(Vec::new());
        let long = writer
            .append_stream("long", 4, Box::new(Cursor::new(vec![0u8; 10])))
            .await
            .unwrap_err();
        assert!(matches!(long, OciError::Integrity(_)));
    }
}
