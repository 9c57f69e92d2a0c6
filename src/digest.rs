//! Streaming checksum capability, abstracted behind [`Digest`] so the
//! archiver's integrity story does not hard-code a hash function. The
//! archive is integrity-, not adversary-, focused, so the production
//! implementation is MD5 via the `md-5` crate — fast, ubiquitous, and
//! already what `md5sum -c` (the recordbook checksum sidecar's format)
//! speaks.

use md5::{Digest as _, Md5};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

const STREAM_BUF_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An in-progress digest computation fed incrementally. Lets a caller
/// streaming bytes for its own purposes (the ECC codec's chunked encode
/// pass) fold a checksum into that same pass instead of re-reading the
/// file afterward.
pub trait IncrementalDigest {
    fn update(&mut self, data: &[u8]);
    fn finish(self: Box<Self>) -> String;
}

pub trait Digest {
    /// Lowercase hex digest of `path`'s full contents, computed in bounded
    /// memory via a fixed-size read buffer.
    fn hash_file(&self, path: &Path) -> Result<String, DigestError>;

    /// Lowercase hex digest of an in-memory byte slice.
    fn hash_bytes(&self, bytes: &[u8]) -> String;

    /// Start a fresh incremental computation.
    fn incremental(&self) -> Box<dyn IncrementalDigest>;

    /// Compare `path`'s digest against `expected_hex` (case-insensitively).
    fn verify(&self, path: &Path, expected_hex: &str) -> Result<bool, DigestError> {
        Ok(self.hash_file(path)?.eq_ignore_ascii_case(expected_hex))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Digest;

struct Md5Incremental(Md5);

impl IncrementalDigest for Md5Incremental {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> String {
        hex::encode(self.0.finalize())
    }
}

impl Digest for Md5Digest {
    fn hash_file(&self, path: &Path) -> Result<String, DigestError> {
        let file = File::open(path).map_err(|source| DigestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut hasher = Md5::new();
        let mut buf = [0u8; STREAM_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|source| DigestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn hash_bytes(&self, bytes: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn incremental(&self) -> Box<dyn IncrementalDigest> {
        Box::new(Md5Incremental(Md5::new()))
    }
}
