//! Content and path hashing using SHA-256.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Size of the buffer used for streaming file content.
pub const BUF_SIZE: usize = 1 << 20;

/// Compute the SHA-256 hash of arbitrary bytes, returned as a hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Compute the SHA-256 hash of a string.
///
/// Used for the name hash of a relative path, which identifies the blob.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash a file's content without loading it into memory.
///
/// Returns the hex digest and the number of bytes read.
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex_encode(&hasher.finalize()), total))
}

/// Incremental hasher fed chunk by chunk while content is copied elsewhere.
#[derive(Default)]
pub struct StreamHasher {
    inner: Sha256,
    total: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.total += chunk.len() as u64;
    }

    /// Finish hashing, returning the hex digest and the byte count.
    pub fn finish(self) -> (String, u64) {
        (hex_encode(&self.inner.finalize()), self.total)
    }
}

/// Encode raw bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
