//! Tokenization of recipe source text using `nom`.
//!
//! Recipes are line oriented: [`split_instructions`] folds continuation
//! lines and drops comments, then each instruction's arguments are
//! tokenized by the argument form it uses (shell words, `key=value` pairs).

use hardbake_common::error::{HardbakeError, Result};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{alpha1, char, space0, space1},
    combinator::{eof, map, rest, value},
    sequence::{delimited, separated_pair, terminated},
};

/// One logical instruction with continuation lines already folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    /// 1-based line the instruction starts on.
    pub line: usize,
    /// Instruction keyword, upper-cased.
    pub keyword: String,
    /// Everything after the keyword, trimmed.
    pub args: String,
}

/// A token in a `RUN` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellToken {
    /// A word, with quotes removed.
    Word(String),
    /// The `&&` command separator.
    And,
}

const fn parse_err(line: usize, message: String) -> HardbakeError {
    HardbakeError::Parse { line, message }
}

fn snippet(s: &str) -> String {
    s.chars().take(20).collect()
}

/// Splits recipe text into logical instructions.
///
/// Blank lines and lines starting with `#` are skipped. A trailing `\`
/// joins the next line onto the current instruction.
///
/// # Errors
///
/// Returns an error if a line does not start with an instruction keyword.
pub fn split_instructions(input: &str) -> Result<Vec<RawInstruction>> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (body, continues) = match trimmed.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed, false),
        };

        let (start, mut text) = pending.take().unwrap_or((line_no, String::new()));
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(body);

        if continues {
            pending = Some((start, text));
        } else {
            out.push(instruction_from(start, &text)?);
        }
    }

    if let Some((start, text)) = pending {
        out.push(instruction_from(start, &text)?);
    }

    Ok(out)
}

fn keyword_and_args(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, keyword) = terminated(alpha1, alt((space1, eof))).parse(input)?;
    let (input, args) = rest(input)?;
    Ok((input, (keyword, args)))
}

fn instruction_from(line: usize, text: &str) -> Result<RawInstruction> {
    let (_, (keyword, args)) = keyword_and_args(text).map_err(|_| {
        parse_err(
            line,
            format!(
                "expected an instruction keyword at: \"{}\"",
                snippet(text)
            ),
        )
    })?;
    Ok(RawInstruction {
        line,
        keyword: keyword.to_ascii_uppercase(),
        args: args.trim().to_string(),
    })
}

/// Parses a double-quoted string literal with basic escape support.
fn double_quoted(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"').parse(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((idx, '"')) => return Ok((&input[idx + 1..], result)),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, c)) => {
                    result.push('\\');
                    result.push(c);
                }
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Char,
                    )));
                }
            },
            Some((_, c)) => result.push(c),
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        str::to_string,
    )
    .parse(input)
}

const fn is_shell_meta(c: char) -> bool {
    matches!(c, '"' | '\'' | '&' | ';' | '|' | '<' | '>' | '(' | ')' | '`')
}

fn bare_word(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| !c.is_whitespace() && !is_shell_meta(c)),
        str::to_string,
    )
    .parse(input)
}

fn shell_token(input: &str) -> IResult<&str, ShellToken> {
    alt((
        value(ShellToken::And, tag("&&")),
        map(double_quoted, ShellToken::Word),
        map(single_quoted, ShellToken::Word),
        map(bare_word, ShellToken::Word),
    ))
    .parse(input)
}

/// Tokenizes the arguments of a `RUN` instruction.
///
/// Only plain words, quoted strings and `&&` are understood. Pipes,
/// redirections, `;` and subshells are rejected.
///
/// # Errors
///
/// Returns an error naming the first unsupported fragment.
pub fn shell_words(line: usize, input: &str) -> Result<Vec<ShellToken>> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = space0::<&str, nom::error::Error<&str>>(remaining)
            .map_err(|e| parse_err(line, format!("lexer error skipping whitespace: {e}")))?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let (rest, token) = shell_token(remaining).map_err(|_| {
            parse_err(
                line,
                format!(
                    "unsupported shell syntax at: \"{}\"",
                    snippet(remaining)
                ),
            )
        })?;
        tokens.push(token);
        remaining = rest;
    }

    Ok(tokens)
}

fn label_key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '=' && c != '"').parse(input)
}

fn label_value(input: &str) -> IResult<&str, String> {
    alt((
        double_quoted,
        map(take_while(|c: char| !c.is_whitespace()), str::to_string),
    ))
    .parse(input)
}

/// Tokenizes `key=value` pairs as used by `LABEL`.
///
/// # Errors
///
/// Returns an error if a pair is missing its `=` or if no pair is present.
pub fn label_pairs(line: usize, input: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = space0::<&str, nom::error::Error<&str>>(remaining)
            .map_err(|e| parse_err(line, format!("lexer error skipping whitespace: {e}")))?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let (rest, (key, val)) = separated_pair(label_key, char('='), label_value)
            .parse(remaining)
            .map_err(|_| {
                parse_err(
                    line,
                    format!(
                        "expected key=value at: \"{}\"",
                        snippet(remaining)
                    ),
                )
            })?;
        pairs.push((key.to_string(), val));
        remaining = rest;
    }

    if pairs.is_empty() {
        return Err(parse_err(line, "LABEL requires at least one key=value pair".into()));
    }
    Ok(pairs)
}
