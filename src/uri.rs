//! Tracking URI validation
//!
//! A tracking URI names the store experiments and runs live in:
//!
//! - `file:///abs/path` - directory-backed store ([`FileBackend`](crate::backend::FileBackend))
//! - `memory://name` - process-local store ([`MemoryBackend`](crate::backend::MemoryBackend))
//! - a bare path (no `://`) - resolved to an absolute `file://` URI
//!
//! Remote schemes (`http://`, `https://`, ...) are rejected.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable consulted when no tracking URI is configured.
pub const TRACKING_URI_ENV: &str = "TRUENO_TRACKING_URI";

/// Directory used when neither the config nor the environment name a store.
pub const DEFAULT_TRACKING_DIR: &str = "./mlruns";

/// A validated tracking location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrackingUri {
    /// Directory on the local filesystem (always absolute).
    File(PathBuf),
    /// Named in-memory store, private to this process.
    Memory(String),
}

impl TrackingUri {
    /// Parse and normalize a tracking URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedTrackingUri`] for remote schemes and
    /// [`Error::InvalidTrackingUri`] for malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidTrackingUri(raw.to_string()));
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            return Ok(Self::File(absolutize(Path::new(raw))?));
        };

        match scheme {
            "file" if !rest.is_empty() => Ok(Self::File(absolutize(Path::new(rest))?)),
            "memory" => Ok(Self::Memory(rest.to_string())),
            "" | "file" => Err(Error::InvalidTrackingUri(raw.to_string())),
            other => Err(Error::UnsupportedTrackingUri(other.to_string())),
        }
    }

    /// Resolve the URI from `TRUENO_TRACKING_URI`, falling back to `./mlruns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment value is not a valid URI.
    pub fn from_env_or_default() -> Result<Self> {
        match std::env::var(TRACKING_URI_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::parse(&value),
            _ => Self::parse(DEFAULT_TRACKING_DIR),
        }
    }

    /// Whether a separate OS process can open the same store.
    #[must_use]
    pub const fn is_shareable(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let joined = std::env::current_dir()?.join(path);
    // Strip `.` components so `./mlruns` and `mlruns` compare equal
    Ok(joined.components().collect())
}

impl fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file://{}", path.display()),
            Self::Memory(name) => write!(f, "memory://{name}"),
        }
    }
}

impl FromStr for TrackingUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrackingUri {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TrackingUri> for String {
    fn from(uri: TrackingUri) -> Self {
        uri.to_string()
    }
}
