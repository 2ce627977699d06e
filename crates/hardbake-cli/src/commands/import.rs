//! `hbk import`: Register a base image in the local catalog.

use anyhow::Context;
use clap::Args;
use hardbake_common::config::HardbakeConfig;
use hardbake_common::constants::{DEFAULT_BASE_USER, DEFAULT_BASE_WORKDIR};
use hardbake_common::types::{ImageRef, Sha256Hash};
use hardbake_image::ImageConfig;
use hardbake_image::hash;
use hardbake_image::import::{ImportOptions, import_base};
use hardbake_image::source::{ImageSource, resolve_source};

use super::Session;
use crate::output;

/// Arguments for the `import` command.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Source URI: `file://<dir>`, `tar://<archive>` or `https://<url>`.
    pub uri: String,

    /// Reference to register the image under.
    #[arg(short, long)]
    pub tag: String,

    /// Expected SHA-256 of the archive, local or remote. Not accepted for
    /// directory sources.
    #[arg(long)]
    pub sha256: Option<String>,

    /// Default identity of the base image.
    #[arg(long, default_value = DEFAULT_BASE_USER)]
    pub user: String,

    /// Default working directory of the base image.
    #[arg(long, default_value = DEFAULT_BASE_WORKDIR)]
    pub workdir: String,

    /// Default command of the base image.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub cmd: Vec<String>,
}

/// Executes the `import` command.
///
/// # Errors
///
/// Returns an error if the source cannot be resolved, loaded or verified.
pub fn execute(args: ImportArgs, config: &HardbakeConfig) -> anyhow::Result<()> {
    let reference = ImageRef::parse(&args.tag)
        .with_context(|| format!("invalid image reference {}", args.tag))?;
    let expected = args
        .sha256
        .as_deref()
        .map(Sha256Hash::from_hex)
        .transpose()
        .context("invalid --sha256 value")?;
    let source = resolve_source(&args.uri)?.with_sha256(expected.clone());
    match (&source, &expected) {
        (ImageSource::Tar(path), Some(expected)) => {
            hash::validate_hash(path, expected)
                .with_context(|| format!("archive {} failed verification", path.display()))?;
        }
        (ImageSource::File(path), Some(_)) => {
            anyhow::bail!(
                "--sha256 verifies archives; {} is a directory, import it as tar:// instead",
                path.display()
            );
        }
        _ => {}
    }

    let session = Session::open(config)?;
    let (id, manifest) = import_base(
        session.store.as_ref(),
        session.catalog.as_ref(),
        &source,
        &reference,
        ImportOptions {
            config: ImageConfig {
                workdir: args.workdir,
                user: args.user,
                cmd: args.cmd,
                ..ImageConfig::default()
            },
            offline: config.offline,
        },
    )
    .with_context(|| format!("failed to import {}", args.uri))?;

    println!(
        "{}  {}  {}",
        id.short(),
        reference,
        output::format_bytes(manifest.size_bytes())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardbake_image::layer::pack_directory;

    use super::super::fixtures::write_rootfs;

    fn args(uri: String, sha256: Option<String>) -> ImportArgs {
        ImportArgs {
            uri,
            tag: "base:2".into(),
            sha256,
            user: "nobody".into(),
            workdir: "/srv".into(),
            cmd: vec!["sh".into()],
        }
    }

    fn config(dir: &std::path::Path) -> HardbakeConfig {
        HardbakeConfig {
            data_dir: dir.join("data"),
            offline: true,
            jobs: 1,
        }
    }

    #[test]
    fn directory_import_registers_runtime_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = write_rootfs(dir.path());
        let config = config(dir.path());
        execute(args(format!("file://{}", rootfs.display()), None), &config).expect("import");

        let entry = Session::open(&config)
            .expect("session")
            .find_image("base:2")
            .expect("entry");
        assert_eq!(entry.manifest.layers.len(), 1);
        assert_eq!(entry.manifest.config.user, "nobody");
        assert_eq!(entry.manifest.config.workdir, "/srv");
        assert_eq!(entry.manifest.config.cmd, ["sh".to_string()]);
    }

    #[test]
    fn sha256_is_rejected_for_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = write_rootfs(dir.path());
        let config = config(dir.path());
        let digest = hash::hash_bytes(b"anything").as_hex().to_string();
        let err = execute(
            args(format!("file://{}", rootfs.display()), Some(digest)),
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--sha256"));
        assert!(
            Session::open(&config)
                .expect("session")
                .catalog
                .list()
                .expect("list")
                .is_empty()
        );
    }

    #[test]
    fn archive_is_verified_against_sha256() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = write_rootfs(dir.path());
        let archive = dir.path().join("rootfs.tar");
        let bytes = pack_directory(&rootfs).expect("pack").to_tar().expect("tar");
        std::fs::write(&archive, &bytes).expect("write");
        let config = config(dir.path());
        let uri = format!("tar://{}", archive.display());

        let wrong = hash::hash_bytes(b"other").as_hex().to_string();
        assert!(execute(args(uri.clone(), Some(wrong)), &config).is_err());

        let right = hash::hash_bytes(&bytes).as_hex().to_string();
        execute(args(uri, Some(right)), &config).expect("import");
        let entries = Session::open(&config)
            .expect("session")
            .catalog
            .list()
            .expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].manifest.layers[0].digest, hash::hash_bytes(&bytes));
    }
}
