//! `hbk plan`: Validate a recipe and show what a build would do.

use std::path::PathBuf;

use clap::Args;
use hardbake_common::config::HardbakeConfig;
use hardbake_common::constants::DEFAULT_RECIPE_FILE;

use super::{Session, read_recipe};
use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the recipe file.
    #[arg(default_value = DEFAULT_RECIPE_FILE)]
    pub file: PathBuf,
}

/// Executes the `plan` command.
///
/// Resolves the base image, validates identity ordering and applies each
/// directive in memory without storing layers or publishing, then lists
/// each step with its cache state.
///
/// # Errors
///
/// Returns an error if parsing, base resolution or validation fails.
pub fn execute(args: PlanArgs, config: &HardbakeConfig) -> anyhow::Result<()> {
    let recipe = read_recipe(&args.file)?;
    let session = Session::open(config)?;
    let plan = session.provisioner().plan(&recipe)?;

    println!("Build plan for: {}", args.file.display());
    println!("{}", output::rule(40));
    println!();
    println!(
        "  1  FROM {}  ({} base layer(s))",
        plan.base, plan.base_layers
    );
    for step in &plan.steps {
        let marker = if step.cached { "cached" } else { "build" };
        let note = if step.metadata_only { "  (metadata)" } else { "" };
        println!("  {:<2} {:<6}  {}{note}", step.step, marker, step.directive);
    }
    println!();

    let cached = plan.steps.iter().filter(|s| s.cached).count();
    println!(
        "  {} step(s), {} cached, {} to build.",
        plan.steps.len(),
        cached,
        plan.steps.len() - cached
    );

    if !plan.identities.is_empty() {
        println!();
        println!("  Identities:");
        for identity in &plan.identities {
            println!("    + {identity}");
        }
    }
    Ok(())
}
