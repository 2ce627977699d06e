//! `hbk images`: Manage the local image catalog.

use clap::Args;
use hardbake_common::config::HardbakeConfig;

use super::Session;
use crate::output;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Remove an image by reference or ID prefix.
    #[arg(long)]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// Lists the catalog, or removes one entry when `--remove` is given.
/// Layers stay in the store; other images may share them.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
pub fn execute(args: ImagesArgs, config: &HardbakeConfig) -> anyhow::Result<()> {
    let session = Session::open(config)?;

    if let Some(query) = args.remove {
        let entry = session.find_image(&query)?;
        session.catalog.remove(&entry.id)?;
        tracing::info!(id = %entry.id.short(), name = %entry.name, "image removed");
        println!("Removed {} ({})", entry.name, entry.id.short());
        return Ok(());
    }

    let entries = session.catalog.list()?;
    if entries.is_empty() {
        println!("No images found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<36} {:<8} {:<12} {:<26}",
        "IMAGE ID", "NAME", "LAYERS", "SIZE", "CREATED"
    );
    for e in &entries {
        println!(
            "{:<14} {:<36} {:<8} {:<12} {:<26}",
            e.id.short(),
            e.name,
            e.manifest.layers.len(),
            output::format_bytes(e.size_bytes),
            e.created_at
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::fixtures::seeded;

    #[test]
    fn listing_a_seeded_catalog_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = seeded(dir.path());
        execute(ImagesArgs { remove: None }, &config).expect("list");
    }

    #[test]
    fn remove_deletes_the_catalog_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = seeded(dir.path());
        execute(
            ImagesArgs {
                remove: Some("base:1".into()),
            },
            &config,
        )
        .expect("remove");

        let session = Session::open(&config).expect("session");
        assert!(session.catalog.list().expect("list").is_empty());
        assert!(session.find_image("base:1").is_err());
    }

    #[test]
    fn removing_an_unknown_image_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = seeded(dir.path());
        let err = execute(
            ImagesArgs {
                remove: Some("ghost:1".into()),
            },
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghost:1"));
        assert_eq!(
            Session::open(&config)
                .expect("session")
                .catalog
                .list()
                .expect("list")
                .len(),
            1
        );
    }
}
