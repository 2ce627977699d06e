//! `hbk inspect`: Show an image's layers and runtime configuration.

use clap::Args;
use hardbake_common::config::HardbakeConfig;

use super::Session;
use crate::output;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image reference or ID prefix.
    pub image: String,

    /// Print the catalog entry as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if no image matches or the catalog cannot be read.
pub fn execute(args: InspectArgs, config: &HardbakeConfig) -> anyhow::Result<()> {
    let session = Session::open(config)?;
    let entry = session.find_image(&args.image)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let cfg = &entry.manifest.config;
    println!("Image:    {}", entry.name);
    println!("ID:       {}", entry.id);
    println!("Source:   {}", entry.source);
    println!("Created:  {}", entry.created_at);
    println!("Size:     {}", output::format_bytes(entry.size_bytes));
    println!("Workdir:  {}", cfg.workdir);
    println!("User:     {}", cfg.user);
    println!("Cmd:      {}", output::format_argv(&cfg.cmd));
    if !cfg.labels.is_empty() {
        println!("Labels:");
        for (k, v) in &cfg.labels {
            println!("  {k}={v}");
        }
    }
    println!();
    println!("Layers:");
    for (i, layer) in entry.manifest.layers.iter().enumerate() {
        let size = if layer.empty {
            "empty".to_string()
        } else {
            output::format_bytes(layer.size_bytes)
        };
        println!(
            "  {:<3} {}  {:<10} {}",
            i + 1,
            layer.digest.as_hex().get(..12).unwrap_or_default(),
            size,
            layer.created_by
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::fixtures::seeded;

    #[test]
    fn inspects_by_reference_and_id_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = seeded(dir.path());
        let id = Session::open(&config)
            .expect("session")
            .find_image("base:1")
            .expect("entry")
            .id;

        execute(
            InspectArgs {
                image: "base:1".into(),
                json: false,
            },
            &config,
        )
        .expect("text");
        execute(
            InspectArgs {
                image: id.short().to_string(),
                json: true,
            },
            &config,
        )
        .expect("json");
    }

    #[test]
    fn unknown_image_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = seeded(dir.path());
        let err = execute(
            InspectArgs {
                image: "ghost:1".into(),
                json: false,
            },
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no image matches"));
    }
}
