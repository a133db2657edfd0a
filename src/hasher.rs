//! Streaming content digests.
//!
//! Files are hashed with SHA-256 in bounded-size chunks, so memory use is
//! independent of file size. A file that cannot be read (vanished mid-read,
//! permission denied, plain I/O error) yields [`HashError::ReadFailure`];
//! callers treat that as "cannot observe now" and skip the file for the
//! current round without touching the ledger.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Chunk size for streaming reads.
const CHUNK_SIZE: usize = 8192;

/// Errors that can occur while producing a content digest.
#[derive(Error, Debug)]
pub enum HashError {
    /// The file could not be read; the observation is skipped for this round.
    #[error("failed to read {path}: {source}")]
    ReadFailure {
        /// Path that could not be observed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored digest string could not be decoded.
    #[error("invalid digest string: {0}")]
    InvalidDigest(String),
}

/// A SHA-256 content digest.
///
/// Used as a content fingerprint throughout the ledger. Rendered as lowercase
/// hex; [`Digest::short`] gives the abbreviated form used in notifications.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Returns the full lowercase hex rendering (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a digest from its 64-character hex rendering.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidDigest`] if the input is not 64 hex
    /// characters.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidDigest(s.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidDigest(s.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns an abbreviated `xxxxxxxx..xxxxxxxx` rendering for human-facing
    /// messages.
    #[must_use]
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}..{}", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Computes the SHA-256 digest of a file's content.
///
/// The file is streamed in [`CHUNK_SIZE`] chunks. Identical bytes always
/// yield an identical digest; an empty file yields the digest of the empty
/// input.
///
/// # Errors
///
/// Returns [`HashError::ReadFailure`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<Digest, HashError> {
    let read_failure = |source| HashError::ReadFailure {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_failure)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut chunk).map_err(read_failure)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }

    Ok(Digest(hasher.finalize().into()))
}
