//! `hbk build`: Provision recipe files and publish the resulting images.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use hardbake_common::config::HardbakeConfig;
use hardbake_common::constants::{DEFAULT_RECIPE_FILE, DEFAULT_TAG};
use hardbake_common::types::ImageRef;
use hardbake_provision::{Image, Provisioner};
use tokio::sync::Semaphore;

use super::{Session, read_recipe};
use crate::output;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Recipe files to build.
    #[arg(default_value = DEFAULT_RECIPE_FILE)]
    pub files: Vec<PathBuf>,

    /// Reference to publish under (single recipe only). Defaults to the
    /// recipe's name with the `latest` tag.
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Maximum number of recipes built at once.
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Executes the `build` command.
///
/// Recipes are independent, so several files are provisioned in parallel
/// on blocking tasks, at most `jobs` at a time.
///
/// # Errors
///
/// Returns an error if any recipe fails to parse, provision or publish.
pub fn execute(args: BuildArgs, config: &HardbakeConfig) -> anyhow::Result<()> {
    if args.tag.is_some() && args.files.len() > 1 {
        anyhow::bail!("--tag can only be used with a single recipe file");
    }
    let jobs = args.jobs.unwrap_or(config.jobs).max(1);

    let mut targets = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let tag = match &args.tag {
            Some(tag) => tag.clone(),
            None => default_tag(file),
        };
        let reference =
            ImageRef::parse(&tag).with_context(|| format!("invalid image reference {tag}"))?;
        targets.push((file.clone(), reference));
    }

    let session = Session::open(config)?;
    let provisioner = session.provisioner();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(jobs)
        .enable_all()
        .build()
        .context("failed to start build runtime")?;
    let results = runtime.block_on(build_all(provisioner, targets, jobs));

    let total = results.len();
    let mut failed = 0;
    for (file, result) in results {
        match result {
            Ok((reference, image)) => {
                println!(
                    "{}  {}  {} layers  {}",
                    image.id.short(),
                    reference,
                    image.layers().len(),
                    output::format_bytes(image.manifest.size_bytes())
                );
            }
            Err(e) => {
                failed += 1;
                tracing::error!(file = %file.display(), error = %format!("{e:#}"), "build failed");
                println!("FAILED  {}: {e:#}", file.display());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} build(s) failed");
    }
    Ok(())
}

type BuildResult = anyhow::Result<(ImageRef, Image)>;

async fn build_all(
    provisioner: Provisioner,
    targets: Vec<(PathBuf, ImageRef)>,
    jobs: usize,
) -> Vec<(PathBuf, BuildResult)> {
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut handles = Vec::with_capacity(targets.len());

    for (file, reference) in targets {
        let task = run_one(provisioner.clone(), semaphore.clone(), file.clone(), reference);
        handles.push((file, tokio::spawn(task)));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (file, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("build task failed: {e}")),
        };
        results.push((file, result));
    }
    results
}

async fn run_one(
    provisioner: Provisioner,
    semaphore: Arc<Semaphore>,
    file: PathBuf,
    reference: ImageRef,
) -> BuildResult {
    let _permit = semaphore
        .acquire_owned()
        .await
        .context("build queue closed")?;
    tokio::task::spawn_blocking(move || build_one(&provisioner, &file, reference))
        .await
        .context("build task panicked")?
}

fn build_one(provisioner: &Provisioner, file: &Path, reference: ImageRef) -> BuildResult {
    tracing::info!(file = %file.display(), reference = %reference, "building recipe");
    let recipe = read_recipe(file)?;
    let origin = file.display().to_string();
    let image = provisioner.build(&recipe, &reference, &origin)?;
    Ok((reference, image))
}

/// Derives a reference from a recipe path: `java.Hardfile` becomes
/// `java:latest`, a plain `Hardfile` takes its directory's name.
fn default_tag(file: &Path) -> String {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name
        .strip_suffix(&format!(".{DEFAULT_RECIPE_FILE}"))
        .map(String::from)
        .or_else(|| {
            if file_name == DEFAULT_RECIPE_FILE {
                std::path::absolute(file)
                    .ok()
                    .and_then(|p| p.parent()?.file_name().map(|n| n.to_string_lossy().into_owned()))
            } else {
                Path::new(&file_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            }
        })
        .unwrap_or_else(|| "image".to_string());

    let name: String = stem
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{name}:{DEFAULT_TAG}")
}
