//! File-backed cache for fetched structured documents.
//!
//! Entries are keyed by a hash of (identifier, format) and carry a
//! time-to-live. An entry that has expired or no longer passes structural
//! validation is removed and the caller silently refetches; cache writes are
//! best-effort and never fail the pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

/// TTL'd document cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DocumentCache {
    /// Creates a cache over `dir` with the given entry time-to-live.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// Cache file path for one (identifier, format) pair.
    fn entry_path(&self, identifier: &str, format: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(format.as_bytes());
        let digest = hasher.finalize();
        let mut name = String::with_capacity(64 + 5);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".json");
        self.dir.join(name)
    }

    /// Loads a cached document, if present, fresh, and structurally valid.
    ///
    /// Expired or unparseable entries are deleted so the caller regenerates
    /// them transparently.
    #[instrument(skip(self))]
    pub async fn load<T: DeserializeOwned>(&self, identifier: &str, format: &str) -> Option<T> {
        let path = self.entry_path(identifier, format);

        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let fresh = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age <= self.ttl);
        if !fresh {
            debug!(path = %path.display(), "cache entry expired");
            remove_entry(&path).await;
            return None;
        }

        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!(path = %path.display(), "cache hit");
                Some(value)
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "cache entry failed validation");
                remove_entry(&path).await;
                None
            }
        }
    }

    /// Stores a document, best-effort.
    #[instrument(skip(self, value))]
    pub async fn store<T: Serialize>(&self, identifier: &str, format: &str, value: &T) {
        let path = self.entry_path(identifier, format);
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!(%error, "cache serialization failed");
                return;
            }
        };

        if let Err(error) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), %error, "cannot create cache directory");
            return;
        }
        if let Err(error) = tokio::fs::write(&path, serialized).await {
            warn!(path = %path.display(), %error, "cache write failed");
        } else {
            debug!(path = %path.display(), "cache entry written");
        }
    }
}

async fn remove_entry(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), %error, "cache entry removal failed");
    }
}
