//! Local storage backend for layers and the layer cache.
//!
//! On-disk layout under the data directory:
//!
//! ```text
//! layers/<hex>.tar   layer archives, named by their SHA-256
//! cache/<hex>        cache key -> layer digest
//! tmp/               partially written blobs
//! ```
//!
//! Blobs are written to `tmp/` and then hard-linked into place. Linking
//! fails if the target exists, so for any digest at most one writer commits
//! and concurrent builds producing the same layer converge on one file.
//! Cache entries are written to `tmp/` and renamed over any previous entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::Sha256Hash;

/// Content-addressed layer storage plus the directive cache.
pub trait LayerStore: Send + Sync {
    /// Stores a layer archive and returns its digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be persisted.
    fn store(&self, blob: &[u8]) -> Result<Sha256Hash>;

    /// Fetches a layer archive, verifying it against its digest.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::NotFound` for unknown digests and
    /// `HardbakeError::HashMismatch` for corrupted blobs.
    fn fetch(&self, digest: &Sha256Hash) -> Result<Vec<u8>>;

    /// Whether a layer with this digest is stored.
    fn contains(&self, digest: &Sha256Hash) -> bool;

    /// Looks up the layer digest recorded for a cache key.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache entry exists but cannot be read.
    fn cache_lookup(&self, key: &Sha256Hash) -> Result<Option<Sha256Hash>>;

    /// Records the layer digest produced for a cache key, replacing any
    /// earlier entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache entry cannot be written.
    fn cache_record(&self, key: &Sha256Hash, digest: &Sha256Hash) -> Result<()>;
}

/// Manages local storage of layers.
#[derive(Debug)]
pub struct StorageBackend {
    /// Root directory for all stored data.
    root: PathBuf,
}

impl StorageBackend {
    /// Opens or initializes the storage backend at the given root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or accessed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::info!(path = %root.display(), "opening storage backend");
        for sub in ["layers", "cache", "tmp"] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| HardbakeError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Returns the path to a layer archive given its hash.
    #[must_use]
    pub fn layer_path(&self, digest: &Sha256Hash) -> PathBuf {
        self.root
            .join("layers")
            .join(format!("{}.tar", digest.as_hex()))
    }

    fn cache_path(&self, key: &Sha256Hash) -> PathBuf {
        self.root.join("cache").join(key.as_hex())
    }

    fn write_tmp(&self, bytes: &[u8]) -> Result<PathBuf> {
        let tmp = self
            .root
            .join("tmp")
            .join(format!("{}.partial", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes).map_err(|e| HardbakeError::io(&tmp, e))?;
        Ok(tmp)
    }

    /// Writes `bytes` to `target` unless it already exists. Returns whether
    /// this call created the file.
    fn commit_exclusive(&self, target: &Path, bytes: &[u8]) -> Result<bool> {
        if target.exists() {
            return Ok(false);
        }

        let tmp = self.write_tmp(bytes)?;

        let linked = std::fs::hard_link(&tmp, target);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(HardbakeError::io(target, e)),
        }
    }
}

impl LayerStore for StorageBackend {
    fn store(&self, blob: &[u8]) -> Result<Sha256Hash> {
        let digest = crate::hash::hash_bytes(blob);
        let path = self.layer_path(&digest);
        if self.commit_exclusive(&path, blob)? {
            tracing::info!(digest = %digest, size = blob.len(), "layer committed");
        } else {
            tracing::debug!(digest = %digest, "layer already present");
        }
        Ok(digest)
    }

    fn fetch(&self, digest: &Sha256Hash) -> Result<Vec<u8>> {
        let path = self.layer_path(digest);
        let blob = std::fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                HardbakeError::NotFound {
                    kind: "layer",
                    id: digest.to_string(),
                }
            } else {
                HardbakeError::io(&path, e)
            }
        })?;
        crate::hash::validate_bytes(&path.display().to_string(), &blob, digest)?;
        Ok(blob)
    }

    fn contains(&self, digest: &Sha256Hash) -> bool {
        self.layer_path(digest).exists()
    }

    fn cache_lookup(&self, key: &Sha256Hash) -> Result<Option<Sha256Hash>> {
        let path = self.cache_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(Sha256Hash::from_hex(content.trim())?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HardbakeError::io(&path, e)),
        }
    }

    fn cache_record(&self, key: &Sha256Hash, digest: &Sha256Hash) -> Result<()> {
        let path = self.cache_path(key);
        let tmp = self.write_tmp(digest.as_hex().as_bytes())?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            HardbakeError::io(&path, e)
        })?;
        tracing::debug!(key = %key, layer = %digest, "cache entry recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    #[test]
    fn storage_open_creates_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _storage = StorageBackend::open(dir.path().to_path_buf()).expect("open");
        for sub in ["layers", "cache", "tmp"] {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[test]
    fn storage_layer_path_includes_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path().to_path_buf()).expect("open");
        let digest = hash_bytes(b"abc");
        let path = storage.layer_path(&digest);
        assert!(path.ends_with(format!("layers/{}.tar", digest.as_hex())));
    }

    #[test]
    fn store_then_fetch_returns_same_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let digest = storage.store(b"layer bytes").expect("store");
        assert_eq!(digest, hash_bytes(b"layer bytes"));
        assert!(storage.contains(&digest));
        assert_eq!(storage.fetch(&digest).expect("fetch"), b"layer bytes");
    }

    #[test]
    fn storing_twice_converges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let a = storage.store(b"same").expect("store");
        let b = storage.store(b"same").expect("store");
        assert_eq!(a, b);
        let tmp_entries = std::fs::read_dir(dir.path().join("tmp")).expect("read").count();
        assert_eq!(tmp_entries, 0);
    }

    #[test]
    fn concurrent_writers_converge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = std::sync::Arc::new(StorageBackend::open(dir.path()).expect("open"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || storage.store(b"shared layer").expect("store"))
            })
            .collect();
        let digests: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            storage.fetch(&digests[0]).expect("fetch"),
            b"shared layer"
        );
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let err = storage.fetch(&hash_bytes(b"nope")).unwrap_err();
        assert!(matches!(err, HardbakeError::NotFound { kind: "layer", .. }));
    }

    #[test]
    fn fetch_detects_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let digest = storage.store(b"original").expect("store");
        std::fs::write(storage.layer_path(&digest), b"tampered").expect("overwrite");
        let err = storage.fetch(&digest).unwrap_err();
        assert!(matches!(err, HardbakeError::HashMismatch { .. }));
    }

    #[test]
    fn cache_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let key = hash_bytes(b"key");
        let digest = hash_bytes(b"layer");
        assert!(storage.cache_lookup(&key).expect("lookup").is_none());
        storage.cache_record(&key, &digest).expect("record");
        assert_eq!(storage.cache_lookup(&key).expect("lookup"), Some(digest));
    }

    #[test]
    fn cache_record_replaces_stale_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageBackend::open(dir.path()).expect("open");
        let key = hash_bytes(b"key");
        storage.cache_record(&key, &hash_bytes(b"stale")).expect("record");
        storage.cache_record(&key, &hash_bytes(b"fresh")).expect("record");
        assert_eq!(
            storage.cache_lookup(&key).expect("lookup"),
            Some(hash_bytes(b"fresh"))
        );
        let leftovers = std::fs::read_dir(dir.path().join("tmp")).expect("tmp").count();
        assert_eq!(leftovers, 0);
    }
}
