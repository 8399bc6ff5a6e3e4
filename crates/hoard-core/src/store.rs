//! Versioned content storage.
//!
//! Blobs live at `.hoard/b<branch>/r<revision>/<name_hash>`. Content is
//! streamed in fixed-size chunks and optionally zlib-compressed; the
//! recorded content hash is always taken over the uncompressed bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use crate::error::{HoardError, HoardResult};
use crate::hash::{StreamHasher, BUF_SIZE};

/// Result of storing one file version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    /// SHA-256 of the uncompressed content.
    pub hash: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Bytes written to disk (differs from `size` when compressing).
    pub written: u64,
}

/// Counts bytes passing through to the underlying writer.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Blob storage rooted at the repository's metadata folder.
#[derive(Debug, Clone)]
pub struct ContentStore {
    meta_dir: PathBuf,
    compress: bool,
}

impl ContentStore {
    pub fn new(meta_dir: &Path, compress: bool) -> Self {
        ContentStore {
            meta_dir: meta_dir.to_path_buf(),
            compress,
        }
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn branch_dir(&self, branch: u32) -> PathBuf {
        self.meta_dir.join(format!("b{branch}"))
    }

    pub fn revision_dir(&self, branch: u32, revision: u32) -> PathBuf {
        self.branch_dir(branch).join(format!("r{revision}"))
    }

    pub fn blob_path(&self, branch: u32, revision: u32, name_hash: &str) -> PathBuf {
        self.revision_dir(branch, revision).join(name_hash)
    }

    /// Store the file at `source` as the blob `(branch, revision, name_hash)`.
    ///
    /// The revision folder is created on demand. An existing blob at the
    /// target means two paths produced the same name hash.
    #[cfg(test)]
    pub fn store_file(
        &self,
        source: &Path,
        branch: u32,
        revision: u32,
        name_hash: &str,
    ) -> HoardResult<StoredBlob> {
        let target = self.blob_path(branch, revision, name_hash);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut reader = File::open(source)?;
        self.store_reader(&mut reader, &target)
    }

    /// Stream `reader` into a new blob file at `target`.
    pub fn store_reader<R: Read>(&self, reader: &mut R, target: &Path) -> HoardResult<StoredBlob> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    HoardError::HashCollision(target.display().to_string())
                }
                _ => HoardError::Io(e),
            })?;
        let counter = CountingWriter {
            inner: BufWriter::new(file),
            count: 0,
        };
        let mut hasher = StreamHasher::new();
        let mut buf = vec![0u8; BUF_SIZE];

        let written = if self.compress {
            let mut encoder = ZlibEncoder::new(counter, Compression::default());
            copy_chunks(reader, &mut encoder, &mut hasher, &mut buf)?;
            let mut counter = encoder.finish()?;
            counter.flush()?;
            counter.count
        } else {
            let mut counter = counter;
            copy_chunks(reader, &mut counter, &mut hasher, &mut buf)?;
            counter.flush()?;
            counter.count
        };

        let (hash, size) = hasher.finish();
        Ok(StoredBlob {
            hash,
            size,
            written,
        })
    }

    /// Open a blob for reading, decompressing transparently.
    ///
    /// A missing blob is logged and yields `None`.
    pub fn open(&self, location: &Path) -> HoardResult<Option<Box<dyn Read>>> {
        let file = match File::open(location) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("content blob missing: {}", location.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if self.compress {
            Ok(Some(Box::new(ZlibDecoder::new(file))))
        } else {
            Ok(Some(Box::new(file)))
        }
    }

    /// Read a whole blob into memory (used by diff and merge only).
    pub fn read(&self, location: &Path) -> HoardResult<Option<Vec<u8>>> {
        let Some(mut reader) = self.open(location)? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Stream a blob into the working file `target`, returning the bytes written.
    pub fn restore_to(&self, location: &Path, target: &Path) -> HoardResult<Option<u64>> {
        let Some(mut reader) = self.open(location)? else {
            return Ok(None);
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(target)?);
        let mut buf = vec![0u8; BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
        }
        out.flush()?;
        Ok(Some(total))
    }

    /// Copy a blob verbatim between storage locations.
    pub fn copy_blob(&self, from: &Path, to: &Path) -> HoardResult<bool> {
        if !from.exists() {
            warn!("content blob missing: {}", from.display());
            return Ok(false);
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        Ok(true)
    }
}

fn copy_chunks<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    hasher: &mut StreamHasher,
    buf: &mut [u8],
) -> io::Result<()> {
    loop {
        let n = reader.read(buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn content() -> Vec<u8> {
        b"line of text\n".repeat(500)
    }

    #[test]
    fn test_store_and_restore_plain() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(&dir.path().join(".hoard"), false);
        let source = dir.path().join("a.txt");
        fs::write(&source, content()).unwrap();

        let blob = store.store_file(&source, 0, 0, "abc").unwrap();
        assert_eq!(blob.hash, hash_bytes(&content()));
        assert_eq!(blob.size, content().len() as u64);
        assert_eq!(blob.written, blob.size);

        let target = dir.path().join("out").join("a.txt");
        let n = store
            .restore_to(&store.blob_path(0, 0, "abc"), &target)
            .unwrap();
        assert_eq!(n, Some(content().len() as u64));
        assert_eq!(fs::read(&target).unwrap(), content());
    }

    #[test]
    fn test_store_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(&dir.path().join(".hoard"), true);
        let source = dir.path().join("a.txt");
        fs::write(&source, content()).unwrap();

        let blob = store.store_file(&source, 1, 2, "xyz").unwrap();
        assert!(blob.written < blob.size);
        let data = store.read(&store.blob_path(1, 2, "xyz")).unwrap().unwrap();
        assert_eq!(data, content());
    }

    #[test]
    fn test_missing_blob_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false);
        let missing = store.blob_path(0, 0, "nope");
        assert!(store.read(&missing).unwrap().is_none());
        assert!(store
            .restore_to(&missing, &dir.path().join("x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_existing_blob_is_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false);
        let source = dir.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        store.store_file(&source, 0, 0, "h").unwrap();
        let result = store.store_file(&source, 0, 0, "h");
        assert!(matches!(result, Err(HoardError::HashCollision(_))));
    }
}
