//! Image manifests: the ordered layer list plus runtime configuration.

use std::collections::BTreeMap;

use hardbake_common::error::Result;
use hardbake_common::types::{ImageId, Sha256Hash};
use serde::{Deserialize, Serialize};

/// Runtime configuration surfaced to whatever later starts a container
/// from the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Current directory of the runtime process.
    pub workdir: String,
    /// Identity the runtime process executes as.
    pub user: String,
    /// Default argument vector.
    pub cmd: Vec<String>,
    /// Informational labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            workdir: hardbake_common::constants::DEFAULT_BASE_WORKDIR.into(),
            user: hardbake_common::constants::DEFAULT_BASE_USER.into(),
            cmd: Vec::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// One entry in an image's layer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Digest of the uncompressed layer archive.
    pub digest: Sha256Hash,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Directive that produced the layer.
    pub created_by: String,
    /// Whether the directive left the filesystem unchanged.
    #[serde(default)]
    pub empty: bool,
}

/// An immutable image: layers bottom to top plus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Layers, bottom to top.
    pub layers: Vec<LayerRecord>,
    /// Runtime configuration.
    pub config: ImageConfig,
    /// Manifest digest of the base image, if built from one.
    #[serde(default)]
    pub parent: Option<Sha256Hash>,
}

impl ImageManifest {
    /// Content digest of the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized.
    pub fn digest(&self) -> Result<Sha256Hash> {
        let canonical = serde_json::to_vec(self)?;
        Ok(crate::hash::hash_bytes(&canonical))
    }

    /// Image identifier derived from the manifest digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized.
    pub fn id(&self) -> Result<ImageId> {
        Ok(ImageId::new(self.digest()?.as_hex()))
    }

    /// Total size of all layer archives.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn manifest(user: &str) -> ImageManifest {
        ImageManifest {
            layers: vec![LayerRecord {
                digest: hash_bytes(b"layer"),
                size_bytes: 1024,
                created_by: "IMPORT tar:///tmp/base.tar".into(),
                empty: false,
            }],
            config: ImageConfig {
                user: user.into(),
                ..ImageConfig::default()
            },
            parent: None,
        }
    }

    #[test]
    fn default_config_runs_as_root_in_slash() {
        let config = ImageConfig::default();
        assert_eq!(config.user, "root");
        assert_eq!(config.workdir, "/");
        assert!(config.cmd.is_empty());
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        assert_eq!(
            manifest("root").digest().expect("digest"),
            manifest("root").digest().expect("digest")
        );
        assert_ne!(
            manifest("root").digest().expect("digest"),
            manifest("appuser").digest().expect("digest")
        );
    }

    #[test]
    fn id_is_digest_hex() {
        let m = manifest("root");
        assert_eq!(m.id().expect("id").as_str(), m.digest().expect("digest").as_hex());
    }

    #[test]
    fn size_sums_layers() {
        let mut m = manifest("root");
        m.layers.push(LayerRecord {
            digest: hash_bytes(b"second"),
            size_bytes: 512,
            created_by: "WORKDIR /app".into(),
            empty: false,
        });
        assert_eq!(m.size_bytes(), 1536);
    }
}
