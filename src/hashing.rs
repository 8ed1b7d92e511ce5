use crate::errors::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A fixed-width content digest (SHA-256)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; Digest::SIZE]);

impl Digest {
    /// Width of the raw digest encoding in bytes
    pub const SIZE: usize = 32;

    /// Hash an in-memory buffer
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Hash a file's content using streaming to handle large files
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::file_system(path.to_path_buf(), "open file for hashing", e))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| Error::file_system(path.to_path_buf(), "read file for hashing", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Dependency path to content digest, in the path-sorted order the cache
/// entry format serializes
pub type DependencyRecords = BTreeMap<String, Digest>;

/// Per-invocation digest memo shared by all input files of one compile.
///
/// Avoids hashing a header shared between inputs more than once. Never
/// persisted; a digest recorded for a path is final for the run.
#[derive(Debug, Default)]
pub struct DependencyDigests {
    digests: HashMap<String, Digest>,
}

impl DependencyDigests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Digest> {
        self.digests.get(path).copied()
    }

    pub fn set(&mut self, path: impl Into<String>, digest: Digest) {
        self.digests.insert(path.into(), digest);
    }
}
