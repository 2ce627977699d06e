//! Recipe file parser built on `nom`.
//!
//! Transforms raw recipe text into a [`Recipe`] through line splitting,
//! per-instruction tokenization and directive construction. Ordering checks
//! that need to know the base image's accounts live in [`crate::graph`].

pub mod account;
pub mod ast;
pub mod lexer;

use hardbake_common::error::{HardbakeError, Result};
use hardbake_common::types::ImageRef;

use self::ast::{Directive, Recipe, Step};
use self::lexer::{RawInstruction, ShellToken};

const fn parse_err(line: usize, message: String) -> HardbakeError {
    HardbakeError::Parse { line, message }
}

/// Parses a recipe from its source text.
///
/// # Errors
///
/// Returns `HardbakeError::Parse` with the offending line if the input is
/// malformed, does not start with `FROM`, or uses an unsupported
/// instruction or command.
pub fn parse_recipe(input: &str) -> Result<Recipe> {
    tracing::info!("parsing recipe input");
    let instructions = lexer::split_instructions(input)?;
    let mut iter = instructions.into_iter();

    let first = iter
        .next()
        .ok_or_else(|| parse_err(1, "recipe is empty: expected FROM".into()))?;
    if first.keyword != "FROM" {
        return Err(parse_err(
            first.line,
            format!("recipe must start with FROM, got {}", first.keyword),
        ));
    }
    let base = parse_from(&first)?;

    let mut steps = Vec::new();
    for inst in iter {
        for directive in parse_instruction(&inst)? {
            steps.push(Step {
                line: inst.line,
                directive,
            });
        }
    }

    let recipe = Recipe {
        base,
        base_line: first.line,
        steps,
    };
    tracing::debug!(
        base = %recipe.base,
        steps = recipe.steps.len(),
        "recipe parsed"
    );
    Ok(recipe)
}

fn parse_from(inst: &RawInstruction) -> Result<ImageRef> {
    let mut parts = inst.args.split_whitespace();
    let reference = parts
        .next()
        .ok_or_else(|| parse_err(inst.line, "FROM requires an image reference".into()))?;
    if parts.next().is_some() {
        return Err(parse_err(
            inst.line,
            "multi-stage builds (FROM ... AS ...) are not supported".into(),
        ));
    }
    ImageRef::parse(reference).map_err(|e| parse_err(inst.line, e.to_string()))
}

fn parse_instruction(inst: &RawInstruction) -> Result<Vec<Directive>> {
    match inst.keyword.as_str() {
        "FROM" => Err(parse_err(
            inst.line,
            "only one FROM instruction is allowed".into(),
        )),
        "LABEL" => Ok(lexer::label_pairs(inst.line, &inst.args)?
            .into_iter()
            .map(|(key, value)| Directive::Label { key, value })
            .collect()),
        "MAINTAINER" => Ok(vec![Directive::Label {
            key: "maintainer".into(),
            value: require_args(inst)?.to_string(),
        }]),
        "WORKDIR" => Ok(vec![Directive::Workdir {
            path: require_args(inst)?.to_string(),
        }]),
        "RUN" => parse_run(inst),
        "USER" => parse_user(inst).map(|d| vec![d]),
        "CMD" => parse_cmd(inst).map(|d| vec![d]),
        other => Err(parse_err(
            inst.line,
            format!("unsupported instruction: {other}"),
        )),
    }
}

fn require_args(inst: &RawInstruction) -> Result<&str> {
    if inst.args.is_empty() {
        return Err(parse_err(
            inst.line,
            format!("{} requires an argument", inst.keyword),
        ));
    }
    Ok(&inst.args)
}

fn parse_run(inst: &RawInstruction) -> Result<Vec<Directive>> {
    let tokens = lexer::shell_words(inst.line, require_args(inst)?)?;
    let mut directives = Vec::new();
    let mut command = Vec::new();

    for token in tokens.into_iter().chain(std::iter::once(ShellToken::And)) {
        match token {
            ShellToken::Word(word) => command.push(word),
            ShellToken::And => {
                directives.push(account::parse_account_command(inst.line, &command)?);
                command.clear();
            }
        }
    }

    Ok(directives)
}

fn parse_user(inst: &RawInstruction) -> Result<Directive> {
    let name = require_args(inst)?;
    if name.contains(':') {
        return Err(parse_err(
            inst.line,
            "USER with a group override is not supported".into(),
        ));
    }
    account::validate_account_name(inst.line, name)?;
    Ok(Directive::UserSwitch {
        name: name.to_string(),
    })
}

/// Exec form (`["a", "b"]`) is JSON; anything else runs through `/bin/sh -c`.
fn parse_cmd(inst: &RawInstruction) -> Result<Directive> {
    let args = require_args(inst)?;
    if args.starts_with('[') {
        if let Ok(argv) = serde_json::from_str::<Vec<String>>(args) {
            return Ok(Directive::Cmd { argv });
        }
        tracing::debug!(line = inst.line, "CMD is not a JSON array, using shell form");
    }
    Ok(Directive::Cmd {
        argv: vec!["/bin/sh".into(), "-c".into(), args.to_string()],
    })
}
