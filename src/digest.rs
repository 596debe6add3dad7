//! SHA256 content digests
//!
//! [`Digest`] is the identity of every blob and manifest in a store. Only the
//! `sha256` algorithm is accepted; the hex part is always 64 lowercase chars.

use crate::error::{OciError, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::str::FromStr;

pub const SHA256_PREFIX: &str = "sha256";

/// Digest of the empty byte string
pub const EMPTY_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// A validated `algorithm:hex` content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of a byte slice
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256Hasher::new();
        hasher.update(data);
        hasher.finish().0
    }

    /// Build a digest from a raw 32-byte SHA256 output
    pub fn from_sha256(bytes: &[u8]) -> Self {
        Digest(format!("{}:{}", SHA256_PREFIX, hex::encode(bytes)))
    }

    pub fn algorithm(&self) -> &str {
        SHA256_PREFIX
    }

    /// Hex part, without the algorithm prefix
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len() + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        &self.0[..SHA256_PREFIX.len() + 1 + 12]
    }

    fn is_valid_hex(hex: &str) -> bool {
        hex.len() == 64 && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    }
}

impl FromStr for Digest {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| OciError::InvalidDigest(format!("missing algorithm in '{}'", s)))?;
        if algorithm != SHA256_PREFIX {
            return Err(OciError::InvalidDigest(format!(
                "unsupported algorithm '{}' in '{}'",
                algorithm, s
            )));
        }
        if !Self::is_valid_hex(hex) {
            return Err(OciError::InvalidDigest(format!(
                "expected 64 lowercase hex characters in '{}'",
                s
            )));
        }
        Ok(Digest(s.to_string()))
    }
}

impl TryFrom<String> for Digest {
    type Error = OciError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental SHA256 that also counts the bytes it has seen
#[derive(Clone, Default)]
pub struct Sha256Hasher {
    inner: sha2::Sha256,
    size: u64,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.size += data.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the hasher, returning the digest and the number of bytes hashed
    pub fn finish(self) -> (Digest, u64) {
        (Digest::from_sha256(&self.inner.finalize()), self.size)
    }
}

impl std::io::Write for Sha256Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
