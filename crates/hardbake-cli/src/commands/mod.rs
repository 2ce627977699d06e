//! CLI command definitions and dispatch.

pub mod build;
pub mod images;
pub mod import;
pub mod inspect;
pub mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hardbake_common::config::HardbakeConfig;
use hardbake_common::types::ImageRef;
use hardbake_image::registry::ImageEntry;
use hardbake_image::{ImageCatalog, StorageBackend};
use hardbake_provision::Provisioner;
use hardbake_recipe::Recipe;

/// hardbake, a least-privilege container image provisioner.
#[derive(Parser, Debug)]
#[command(name = hardbake_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the layer store and image catalog.
    #[arg(long, global = true, env = "HARDBAKE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable offline mode (refuse remote base imports).
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Log output formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision one or more recipe files and publish the images.
    Build(build::BuildArgs),
    /// Validate a recipe and show what a build would do.
    Plan(plan::PlanArgs),
    /// Register a base image from a directory, archive or URL.
    Import(import::ImportArgs),
    /// Manage the local image catalog.
    Images(images::ImagesArgs),
    /// Show an image's layers and runtime configuration.
    Inspect(inspect::InspectArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration loading or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Build(args) => build::execute(args, &config),
        Command::Plan(args) => plan::execute(args, &config),
        Command::Import(args) => import::execute(args, &config),
        Command::Images(args) => images::execute(args, &config),
        Command::Inspect(args) => inspect::execute(args, &config),
    }
}

/// Merges the config file with command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<HardbakeConfig> {
    let mut config = match &cli.config {
        Some(path) => HardbakeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HardbakeConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    config.offline |= cli.offline;
    tracing::debug!(data_dir = %config.data_dir.display(), offline = config.offline, "configuration loaded");
    Ok(config)
}

/// Opened layer store and catalog for one invocation.
pub struct Session {
    /// Content-addressed layer store.
    pub store: Arc<StorageBackend>,
    /// Local image catalog.
    pub catalog: Arc<ImageCatalog>,
}

impl Session {
    /// Opens the store and catalog under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if either cannot be created.
    pub fn open(config: &HardbakeConfig) -> anyhow::Result<Self> {
        let store = StorageBackend::open(&config.data_dir)
            .with_context(|| format!("failed to open layer store in {}", config.data_dir.display()))?;
        let catalog = ImageCatalog::open(&config.data_dir).context("failed to open image catalog")?;
        Ok(Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
        })
    }

    /// A provisioner over this session's store and catalog.
    #[must_use]
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.catalog.clone(), self.store.clone())
    }

    /// Finds a catalog entry by reference, falling back to an id prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or nothing matches.
    pub fn find_image(&self, query: &str) -> anyhow::Result<ImageEntry> {
        if let Ok(reference) = ImageRef::parse(query) {
            if let Some(entry) = self.catalog.find(&reference)? {
                return Ok(entry);
            }
        }
        self.catalog
            .find_by_id(query)?
            .with_context(|| format!("no image matches {query}"))
    }
}

/// Reads and parses a recipe file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn read_recipe(path: &Path) -> anyhow::Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read recipe {}", path.display()))?;
    hardbake_recipe::parse_recipe(&content)
        .with_context(|| format!("failed to parse recipe {}", path.display()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hbk",
            "plan",
            "Hardfile",
            "--offline",
            "--log-format",
            "json",
            "--data-dir",
            "/tmp/hb",
        ])
        .expect("parse");
        assert!(cli.offline);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/hb")));
        assert!(matches!(cli.command, Command::Plan(_)));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hardbake.json");
        std::fs::write(&path, r#"{ "data_dir": "/from/file", "jobs": 3 }"#).expect("write");
        let cli = Cli::try_parse_from([
            "hbk",
            "images",
            "--config",
            path.to_str().expect("utf8"),
            "--data-dir",
            "/from/flag",
            "--offline",
        ])
        .expect("parse");

        let config = load_config(&cli).expect("config");
        assert_eq!(config.data_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.jobs, 3);
        assert!(config.offline);
    }

    #[test]
    fn find_image_by_reference_and_id_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HardbakeConfig {
            data_dir: dir.path().to_path_buf(),
            ..HardbakeConfig::default()
        };
        let session = Session::open(&config).expect("session");
        let manifest = hardbake_image::ImageManifest {
            layers: Vec::new(),
            config: hardbake_image::ImageConfig::default(),
            parent: None,
        };
        let id = hardbake_image::ImageRegistry::publish(
            session.catalog.as_ref(),
            &ImageRef::parse("base:1").expect("ref"),
            &manifest,
            "test",
        )
        .expect("publish");

        assert_eq!(session.find_image("base:1").expect("by ref").id, id);
        assert_eq!(session.find_image(id.short()).expect("by id").id, id);
        assert!(session.find_image("ghost:1").is_err());
    }
}
