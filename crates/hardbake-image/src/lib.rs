//! # hardbake-image
//!
//! Image and layer management for hardbake.
//!
//! Handles:
//! - **Layers**: Deterministic, content-addressed filesystem deltas.
//! - **Storage**: Local layer store with a per-directive layer cache.
//! - **Manifests**: Ordered layer lists plus runtime configuration.
//! - **Registry**: Local image catalog that resolves and publishes images.
//! - **Sources**: `file://`, `tar://` and remote base image sources.
//! - **Hashing**: SHA-256 content verification and cache key chaining.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod import;
pub mod layer;
pub mod manifest;
pub mod memory;
pub mod registry;
pub mod source;
pub mod storage;

pub use manifest::{ImageConfig, ImageManifest, LayerRecord};
pub use registry::{ImageCatalog, ImageRegistry};
pub use storage::{LayerStore, StorageBackend};
