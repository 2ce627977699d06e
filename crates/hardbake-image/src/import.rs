//! Registration of base images from external sources.

use hardbake_common::error::Result;
use hardbake_common::types::{ImageId, ImageRef};

use crate::manifest::{ImageConfig, ImageManifest, LayerRecord};
use crate::registry::ImageRegistry;
use crate::source::ImageSource;
use crate::storage::LayerStore;

/// Options for [`import_base`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Runtime configuration the base image starts with.
    pub config: ImageConfig,
    /// Refuse remote sources.
    pub offline: bool,
}

/// Imports a source as a single-layer base image and publishes it under
/// `reference`.
///
/// # Errors
///
/// Returns an error if the source cannot be loaded or verified, or if the
/// layer or catalog entry cannot be written.
pub fn import_base(
    store: &dyn LayerStore,
    registry: &dyn ImageRegistry,
    source: &ImageSource,
    reference: &ImageRef,
    options: ImportOptions,
) -> Result<(ImageId, ImageManifest)> {
    tracing::info!(reference = %reference, source = ?source, "importing base image");
    let archive = source.load_archive(options.offline)?;
    let digest = store.store(&archive)?;

    let origin = match source {
        ImageSource::File(p) => format!("file://{}", p.display()),
        ImageSource::Tar(p) => format!("tar://{}", p.display()),
        ImageSource::Remote { url, .. } => url.clone(),
    };

    let manifest = ImageManifest {
        layers: vec![LayerRecord {
            digest,
            size_bytes: archive.len() as u64,
            created_by: format!("IMPORT {origin}"),
            empty: false,
        }],
        config: options.config,
        parent: None,
    };
    let id = registry.publish(reference, &manifest, &origin)?;
    Ok((id, manifest))
}
