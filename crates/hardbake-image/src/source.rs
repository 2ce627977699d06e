//! Base image source protocol handlers.
//!
//! Supports `file://` (local root filesystem directory), `tar://` (archive,
//! optionally gzip-compressed), and remote HTTP(S) archives with mandatory
//! SHA-256 validation. Local-first: remote sources are refused offline.

use std::path::PathBuf;

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::Sha256Hash;

/// Supported image source protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Local directory (`file:///path/to/rootfs`).
    File(PathBuf),
    /// Local tar archive (`tar:///path/to/image.tar`).
    Tar(PathBuf),
    /// Remote HTTP(S) archive.
    Remote {
        /// URL of the remote archive.
        url: String,
        /// Expected SHA-256 of the downloaded bytes.
        sha256: Option<Sha256Hash>,
    },
}

/// Resolves an image source URI into an `ImageSource`.
///
/// # Errors
///
/// Returns an error if the URI scheme is unsupported or the path is invalid.
pub fn resolve_source(uri: &str) -> Result<ImageSource> {
    if let Some(path_str) = uri.strip_prefix("file://") {
        let path = PathBuf::from(path_str);
        if !path.is_dir() {
            return Err(HardbakeError::NotFound {
                kind: "image directory",
                id: path_str.to_string(),
            });
        }
        tracing::info!(path = %path.display(), "resolved file:// source");
        Ok(ImageSource::File(path))
    } else if let Some(path_str) = uri.strip_prefix("tar://") {
        let path = PathBuf::from(path_str);
        if !path.is_file() {
            return Err(HardbakeError::NotFound {
                kind: "tar archive",
                id: path_str.to_string(),
            });
        }
        tracing::info!(path = %path.display(), "resolved tar:// source");
        Ok(ImageSource::Tar(path))
    } else if uri.starts_with("https://") || uri.starts_with("http://") {
        tracing::info!(url = uri, "resolved remote source");
        Ok(ImageSource::Remote {
            url: uri.to_string(),
            sha256: None,
        })
    } else {
        Err(HardbakeError::Config {
            message: format!("unsupported image source URI scheme: {uri}"),
        })
    }
}

impl ImageSource {
    /// Attaches the expected digest of a remote archive. No effect on
    /// local sources.
    #[must_use]
    pub fn with_sha256(self, expected: Option<Sha256Hash>) -> Self {
        match self {
            Self::Remote { url, sha256 } => Self::Remote {
                url,
                sha256: expected.or(sha256),
            },
            local => local,
        }
    }

    /// Loads the source as a single uncompressed tar archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read, a remote source is
    /// used offline or without an expected digest, or the download does not
    /// match that digest.
    pub fn load_archive(&self, offline: bool) -> Result<Vec<u8>> {
        match self {
            Self::File(dir) => crate::layer::pack_directory(dir)?.to_tar(),
            Self::Tar(path) => {
                let bytes = std::fs::read(path).map_err(|e| HardbakeError::io(path, e))?;
                crate::layer::normalize_archive(bytes)
            }
            Self::Remote { url, sha256 } => {
                if offline {
                    return Err(HardbakeError::Config {
                        message: format!("offline mode: refusing to fetch {url}"),
                    });
                }
                let expected = sha256.as_ref().ok_or_else(|| HardbakeError::Config {
                    message: format!("remote source {url} requires an expected SHA-256"),
                })?;
                let bytes = download(url)?;
                crate::hash::validate_bytes(url, &bytes, expected)?;
                crate::layer::normalize_archive(bytes)
            }
        }
    }
}

fn download(url: &str) -> Result<Vec<u8>> {
    tracing::info!(url, "downloading base image archive");
    let network_err = |e: reqwest::Error| HardbakeError::Network {
        url: url.to_string(),
        message: e.to_string(),
    };
    let response = reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(network_err)?;
    let bytes = response.bytes().map_err(network_err)?;
    tracing::info!(url, size = bytes.len(), "download complete");
    Ok(bytes.to_vec())
}
