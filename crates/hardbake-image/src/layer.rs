//! Filesystem layer management.
//!
//! Each image is composed of ordered layers. A layer is an uncompressed tar
//! archive holding the delta one directive made to the filesystem, and is
//! content-addressed by the SHA-256 of those bytes. Archives are written
//! deterministically (sorted paths, zero mtimes, explicit ownership) so the
//! same delta always hashes the same.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use hardbake_common::error::{HardbakeError, Result};

const ARCHIVE: &str = "<layer archive>";

fn archive_err(e: std::io::Error) -> HardbakeError {
    HardbakeError::io(ARCHIVE, e)
}

/// A single path in a layer diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    /// A directory.
    Dir {
        /// Permission bits.
        mode: u32,
        /// Owner uid.
        uid: u32,
        /// Owner gid.
        gid: u32,
    },
    /// A regular file.
    File {
        /// Permission bits.
        mode: u32,
        /// File contents.
        contents: Vec<u8>,
    },
    /// A symbolic link.
    Symlink {
        /// Link target.
        target: String,
    },
}

/// An ordered set of filesystem changes that serializes to one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerDiff {
    entries: BTreeMap<String, DiffEntry>,
}

/// Strips `./`, leading and trailing `/` so paths compare equal regardless
/// of how an archive spelled them.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.strip_prefix("./").unwrap_or(path);
    trimmed.trim_matches('/').to_string()
}

impl LayerDiff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root-owned directory.
    pub fn add_dir(&mut self, path: &str, mode: u32) {
        self.add_owned_dir(path, mode, 0, 0);
    }

    /// Adds a directory owned by `uid:gid`.
    pub fn add_owned_dir(&mut self, path: &str, mode: u32, uid: u32, gid: u32) {
        let _ = self
            .entries
            .insert(normalize_path(path), DiffEntry::Dir { mode, uid, gid });
    }

    /// Adds a root-owned regular file.
    pub fn add_file(&mut self, path: &str, mode: u32, contents: impl Into<Vec<u8>>) {
        let _ = self.entries.insert(
            normalize_path(path),
            DiffEntry::File {
                mode,
                contents: contents.into(),
            },
        );
    }

    /// Adds a symbolic link.
    pub fn add_symlink(&mut self, path: &str, target: impl Into<String>) {
        let _ = self.entries.insert(
            normalize_path(path),
            DiffEntry::Symlink {
                target: target.into(),
            },
        );
    }

    /// Whether the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of paths in the diff.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates paths and entries in archive order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &DiffEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    /// Serializes the diff into a deterministic tar archive.
    ///
    /// # Errors
    ///
    /// Returns an error if a path cannot be encoded in a tar header.
    pub fn to_tar(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());

        for (path, entry) in &self.entries {
            let mut header = tar::Header::new_ustar();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);

            match entry {
                DiffEntry::Dir { mode, uid, gid } => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(*mode);
                    header.set_uid(u64::from(*uid));
                    header.set_gid(u64::from(*gid));
                    header.set_size(0);
                    builder
                        .append_data(&mut header, format!("{path}/"), std::io::empty())
                        .map_err(archive_err)?;
                }
                DiffEntry::File { mode, contents } => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(*mode);
                    header.set_size(contents.len() as u64);
                    builder
                        .append_data(&mut header, path, contents.as_slice())
                        .map_err(archive_err)?;
                }
                DiffEntry::Symlink { target } => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_mode(0o777);
                    header.set_size(0);
                    builder
                        .append_link(&mut header, path, target)
                        .map_err(archive_err)?;
                }
            }
        }

        builder.into_inner().map_err(archive_err)
    }
}

/// Returns the contents of `path` in a layer archive, if the layer holds it.
///
/// # Errors
///
/// Returns an error if the archive is malformed.
pub fn read_file(archive: &[u8], path: &str) -> Result<Option<Vec<u8>>> {
    let wanted = normalize_path(path);
    let mut tar = tar::Archive::new(archive);
    for entry in tar.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let entry_path = entry.path().map_err(archive_err)?;
        if normalize_path(&entry_path.to_string_lossy()) != wanted {
            continue;
        }
        let mut contents = Vec::new();
        let _ = entry.read_to_end(&mut contents).map_err(archive_err)?;
        return Ok(Some(contents));
    }
    Ok(None)
}

/// Lists every directory a layer archive creates, explicitly or as the
/// parent of another entry.
///
/// # Errors
///
/// Returns an error if the archive is malformed.
pub fn directories(archive: &[u8]) -> Result<BTreeSet<String>> {
    let mut dirs = BTreeSet::new();
    let mut tar = tar::Archive::new(archive);
    for entry in tar.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        let path = normalize_path(&entry.path().map_err(archive_err)?.to_string_lossy());
        if entry.header().entry_type() == tar::EntryType::Directory && !path.is_empty() {
            let _ = dirs.insert(path.clone());
        }
        let mut parent = Path::new(&path).parent();
        while let Some(p) = parent {
            let s = p.to_string_lossy();
            if s.is_empty() {
                break;
            }
            let _ = dirs.insert(s.into_owned());
            parent = p.parent();
        }
    }
    Ok(dirs)
}

/// Whether a blob starts with the gzip magic bytes.
#[must_use]
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1f, 0x8b])
}

/// Returns a plain tar archive, decompressing gzip input.
///
/// # Errors
///
/// Returns an error if gzip decompression fails.
pub fn normalize_archive(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if !is_gzip(&bytes) {
        return Ok(bytes);
    }
    let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
    let mut out = Vec::new();
    let _ = decoder.read_to_end(&mut out).map_err(archive_err)?;
    tracing::debug!(compressed = bytes.len(), size = out.len(), "decompressed gzip archive");
    Ok(out)
}

/// Packs a directory tree into a diff, in sorted order.
///
/// # Errors
///
/// Returns an error if the tree cannot be read.
pub fn pack_directory(root: &Path) -> Result<LayerDiff> {
    tracing::info!(root = %root.display(), "packing directory into layer");
    let mut diff = LayerDiff::new();
    let mut stack = vec![PathBuf::new()];

    while let Some(rel) = stack.pop() {
        let dir = root.join(&rel);
        let mut children: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| HardbakeError::io(&dir, e))?
            .collect::<std::io::Result<_>>()
            .map_err(|e| HardbakeError::io(&dir, e))?;
        children.sort_by_key(std::fs::DirEntry::file_name);

        for child in children {
            let path = child.path();
            let rel_child = rel.join(child.file_name());
            let name = rel_child.to_string_lossy().replace('\\', "/");
            let meta = std::fs::symlink_metadata(&path).map_err(|e| HardbakeError::io(&path, e))?;

            if meta.file_type().is_symlink() {
                let target = std::fs::read_link(&path).map_err(|e| HardbakeError::io(&path, e))?;
                diff.add_symlink(&name, target.to_string_lossy());
            } else if meta.is_dir() {
                diff.add_dir(&name, permission_bits(&meta, 0o755));
                stack.push(rel_child);
            } else {
                let contents = std::fs::read(&path).map_err(|e| HardbakeError::io(&path, e))?;
                diff.add_file(&name, permission_bits(&meta, 0o644), contents);
            }
        }
    }

    Ok(diff)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata, _fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &std::fs::Metadata, fallback: u32) -> u32 {
    fallback
}
