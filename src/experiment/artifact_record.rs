//! Artifact Record - files stored alongside a run

use std::hash::Hasher;
use std::io::Read;

use chrono::{DateTime, Utc};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Chunk size for content hashing. Fixed so digests are stable across reads.
const HASH_CHUNK: u64 = 64 * 1024;

/// Artifact Record represents a stored artifact from a run.
///
/// `content_hash` has the format `fxhash:<16 hex digits>`. It identifies
/// content for de-duplication and change detection, not for integrity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    path: String,
    content_hash: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record.
    ///
    /// # Arguments
    ///
    /// * `run_id` - ID of the parent run
    /// * `path` - Artifact path relative to the run's artifact root (e.g., "model/model.bin")
    /// * `content_hash` - Digest from [`content_hash`] / [`content_hash_bytes`]
    /// * `size_bytes` - Size of the artifact in bytes
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        path: impl Into<String>,
        content_hash: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            path: path.into(),
            content_hash: content_hash.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the artifact path relative to the run's artifact root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the content hash.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Hash everything a reader yields, returning `(digest, bytes read)`.
///
/// # Errors
///
/// Propagates read errors.
pub fn content_hash(mut reader: impl Read) -> std::io::Result<(String, u64)> {
    let mut hasher = FxHasher::default();
    let mut buf = Vec::with_capacity(HASH_CHUNK as usize);
    let mut total = 0u64;
    loop {
        buf.clear();
        let n = (&mut reader).take(HASH_CHUNK).read_to_end(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write(&buf);
        total += n as u64;
    }
    hasher.write_u64(total);
    Ok((format!("fxhash:{:016x}", hasher.finish()), total))
}

/// Hash an in-memory buffer. Agrees with [`content_hash`] on the same bytes.
#[must_use]
pub fn content_hash_bytes(bytes: &[u8]) -> String {
    // Reading from a slice cannot fail
    content_hash(bytes).map_or_else(|_| String::new(), |(digest, _)| digest)
}
