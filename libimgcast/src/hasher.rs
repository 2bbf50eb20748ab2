//! Content fingerprints
//!
//! A file's identity for dedup purposes is the SHA-256 of its bytes, so the
//! same image copied or renamed is still recognised as already published.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files are streamed through the hasher in chunks of this size
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Hex-encoded SHA-256 digest of a file's full contents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Wrap a digest that was previously rendered with [`ContentFingerprint::as_str`]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of the file at `path`
///
/// Memory use is bounded by [`CHUNK_SIZE`] regardless of file size.
pub fn fingerprint(path: &Path) -> std::io::Result<ContentFingerprint> {
    let file = File::open(path)?;
    fingerprint_reader(file)
}

/// Compute the fingerprint of everything readable from `reader`
pub fn fingerprint_reader<R: Read>(mut reader: R) -> std::io::Result<ContentFingerprint> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(ContentFingerprint(format!("{:x}", hasher.finalize())))
}
