//! Global configuration model for hardbake.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HardbakeError, Result};

/// Root configuration for hardbake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardbakeConfig {
    /// Base directory holding the layer store and image catalog.
    pub data_dir: PathBuf,
    /// Whether offline mode is enabled (remote base imports are refused).
    pub offline: bool,
    /// Maximum number of recipes provisioned concurrently.
    pub jobs: usize,
}

impl Default for HardbakeConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::constants::data_dir().clone(),
            offline: false,
            jobs: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }
}

impl HardbakeConfig {
    /// Loads a configuration from a JSON file. Missing keys take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if `jobs`
    /// is zero.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| HardbakeError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::Config` if `jobs` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(HardbakeError::Config {
                message: "jobs must be at least 1".into(),
            });
        }
        Ok(())
    }
}
