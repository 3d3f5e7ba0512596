//! Content checksums.
//!
//! The algorithm is fixed per deployment; clients compare hex digests
//! verbatim, so switching it invalidates every snapshot they hold.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// Read buffer for hashing (64KB)
const HASH_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Blake3,
    Xxh3,
}

impl ChecksumAlgorithm {
    pub fn hasher(self) -> StreamingHasher {
        match self {
            Self::Blake3 => StreamingHasher::Blake3(Box::new(blake3::Hasher::new())),
            Self::Xxh3 => StreamingHasher::Xxh3(Box::new(Xxh3::new())),
        }
    }
}

/// Incremental digest, fed while bytes are read or written.
pub enum StreamingHasher {
    Blake3(Box<blake3::Hasher>),
    Xxh3(Box<Xxh3>),
}

impl StreamingHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake3(h) => {
                h.update(data);
            }
            Self::Xxh3(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Self::Blake3(h) => hex::encode(h.finalize().as_bytes()),
            Self::Xxh3(h) => hex::encode(h.digest128().to_be_bytes()),
        }
    }
}

/// Hashes file content. Called from the blocking walker thread.
pub trait ChecksumProvider: Send + Sync {
    fn hash(&self, path: &Path) -> io::Result<String>;
}

/// Streams the file through the configured algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDigest {
    pub algorithm: ChecksumAlgorithm,
}

impl FileDigest {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl ChecksumProvider for FileDigest {
    fn hash(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; HASH_BUF_SIZE];

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hasher.finalize())
    }
}
