//! In-memory layer store and registry.
//!
//! Useful for embedding the provisioner without touching disk and for
//! tests. Semantics match the on-disk backends, including first-writer-wins
//! for blobs and cache entries.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::{ImageId, ImageRef, Sha256Hash};

use crate::manifest::ImageManifest;
use crate::registry::{ImageRegistry, verify_pin};
use crate::storage::LayerStore;

/// Layer store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<Sha256Hash, Vec<u8>>>,
    cache: Mutex<HashMap<Sha256Hash, Sha256Hash>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no blob is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LayerStore for MemoryStore {
    fn store(&self, blob: &[u8]) -> Result<Sha256Hash> {
        let digest = crate::hash::hash_bytes(blob);
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = blobs.entry(digest.clone()).or_insert_with(|| blob.to_vec());
        Ok(digest)
    }

    fn fetch(&self, digest: &Sha256Hash) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let blob = blobs.get(digest).cloned().ok_or_else(|| HardbakeError::NotFound {
            kind: "layer",
            id: digest.to_string(),
        })?;
        drop(blobs);
        crate::hash::validate_bytes(&digest.to_string(), &blob, digest)?;
        Ok(blob)
    }

    fn contains(&self, digest: &Sha256Hash) -> bool {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(digest)
    }

    fn cache_lookup(&self, key: &Sha256Hash) -> Result<Option<Sha256Hash>> {
        Ok(self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn cache_record(&self, key: &Sha256Hash, digest: &Sha256Hash) -> Result<()> {
        let _ = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), digest.clone());
        Ok(())
    }
}

/// Registry held in memory, keyed by `name:tag`.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    images: Mutex<HashMap<String, ImageManifest>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageRegistry for MemoryRegistry {
    fn resolve(&self, reference: &ImageRef) -> Result<ImageManifest> {
        let manifest = self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&reference.repo_tag())
            .cloned()
            .ok_or_else(|| HardbakeError::NotFound {
                kind: "image",
                id: reference.to_string(),
            })?;
        verify_pin(reference, &manifest)?;
        Ok(manifest)
    }

    fn publish(
        &self,
        reference: &ImageRef,
        manifest: &ImageManifest,
        _origin: &str,
    ) -> Result<ImageId> {
        let id = manifest.id()?;
        let _ = self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.repo_tag(), manifest.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::manifest::ImageConfig;

    #[test]
    fn store_deduplicates_blobs() {
        let store = MemoryStore::new();
        let a = store.store(b"x").expect("store");
        let b = store.store(b"x").expect("store");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch(&a).expect("fetch"), b"x");
    }

    #[test]
    fn cache_record_replaces_entry() {
        let store = MemoryStore::new();
        let key = hash_bytes(b"k");
        store.cache_record(&key, &hash_bytes(b"first")).expect("record");
        store.cache_record(&key, &hash_bytes(b"second")).expect("record");
        assert_eq!(
            store.cache_lookup(&key).expect("lookup"),
            Some(hash_bytes(b"second"))
        );
    }

    #[test]
    fn registry_publish_resolve() {
        let registry = MemoryRegistry::new();
        let reference = ImageRef::parse("base:1").expect("ref");
        let manifest = ImageManifest {
            layers: Vec::new(),
            config: ImageConfig::default(),
            parent: None,
        };
        let _ = registry.publish(&reference, &manifest, "test").expect("publish");
        assert_eq!(registry.resolve(&reference).expect("resolve"), manifest);
        assert!(registry.resolve(&ImageRef::parse("base:2").expect("ref")).is_err());
    }
}
