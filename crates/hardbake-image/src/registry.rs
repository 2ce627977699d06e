//! Local image catalog management.
//!
//! Maintains an index of available images, their layer lists and runtime
//! configuration, and resolves references for the provisioner.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::{ImageId, ImageRef};
use serde::{Deserialize, Serialize};

use crate::manifest::ImageManifest;

/// Resolves image references and accepts finished images.
pub trait ImageRegistry: Send + Sync {
    /// Looks up the manifest a reference points at.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::NotFound` for unknown references and
    /// `HardbakeError::HashMismatch` when a pinned digest does not match.
    fn resolve(&self, reference: &ImageRef) -> Result<ImageManifest>;

    /// Publishes a manifest under a reference, replacing any previous image
    /// with that reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be recorded.
    fn publish(&self, reference: &ImageRef, manifest: &ImageManifest, origin: &str)
    -> Result<ImageId>;
}

/// Checks a resolved manifest against a pinned reference.
///
/// # Errors
///
/// Returns `HardbakeError::HashMismatch` if the reference is pinned to a
/// different digest.
pub fn verify_pin(reference: &ImageRef, manifest: &ImageManifest) -> Result<()> {
    if let Some(expected) = &reference.digest {
        let actual = manifest.digest()?;
        if &actual != expected {
            return Err(HardbakeError::HashMismatch {
                resource: reference.repo_tag(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Entry in the local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Unique identifier for this image.
    pub id: ImageId,
    /// Reference (`name:tag`).
    pub name: String,
    /// Where the image came from: an import URI or the recipe it was built from.
    pub source: String,
    /// Layers and configuration.
    pub manifest: ImageManifest,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Creation timestamp (ISO-8601).
    pub created_at: String,
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ImageCatalog {
    /// Opens or creates an image catalog at the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join("images").join("catalog.json");
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HardbakeError::io(parent, e))?;
        }
        Ok(Self {
            catalog_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.catalog_path)
            .map_err(|e| HardbakeError::io(&self.catalog_path, e))?;
        let entries: Vec<ImageEntry> = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Finds an image by reference (`name:tag`).
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn find(&self, reference: &ImageRef) -> Result<Option<ImageEntry>> {
        let wanted = reference.repo_tag();
        Ok(self.list()?.into_iter().find(|e| e.name == wanted))
    }

    /// Finds an image by full ID or unique ID prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn find_by_id(&self, prefix: &str) -> Result<Option<ImageEntry>> {
        let mut matches: Vec<ImageEntry> = self
            .list()?
            .into_iter()
            .filter(|e| e.id.as_str().starts_with(prefix))
            .collect();
        if matches.len() == 1 {
            Ok(matches.pop())
        } else {
            Ok(None)
        }
    }

    /// Registers an image. An existing entry with the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn register(&self, entry: ImageEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.list()?;
        entries.retain(|e| e.name != entry.name);
        entries.push(entry);
        self.write_entries(&entries)
    }

    /// Removes an image by ID.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::NotFound` if no image with the given ID exists.
    pub fn remove(&self, id: &ImageId) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| e.id.as_str() != id.as_str());
        if entries.len() == before {
            return Err(HardbakeError::NotFound {
                kind: "image",
                id: id.to_string(),
            });
        }
        self.write_entries(&entries)
    }

    /// Writes through a temporary file so readers never see half a catalog.
    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| HardbakeError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.catalog_path)
            .map_err(|e| HardbakeError::io(&self.catalog_path, e))?;
        Ok(())
    }
}

impl ImageRegistry for ImageCatalog {
    fn resolve(&self, reference: &ImageRef) -> Result<ImageManifest> {
        let entry = self.find(reference)?.ok_or_else(|| HardbakeError::NotFound {
            kind: "image",
            id: reference.to_string(),
        })?;
        verify_pin(reference, &entry.manifest)?;
        tracing::debug!(reference = %reference, id = %entry.id.short(), "resolved image");
        Ok(entry.manifest)
    }

    fn publish(
        &self,
        reference: &ImageRef,
        manifest: &ImageManifest,
        origin: &str,
    ) -> Result<ImageId> {
        let id = manifest.id()?;
        self.register(ImageEntry {
            id: id.clone(),
            name: reference.repo_tag(),
            source: origin.to_string(),
            manifest: manifest.clone(),
            size_bytes: manifest.size_bytes(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })?;
        tracing::info!(reference = %reference, id = %id.short(), "image published");
        Ok(id)
    }
}
