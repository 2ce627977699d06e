//! Recognition of account-management commands inside `RUN`.
//!
//! Accepts the Debian (`addgroup`/`adduser`), shadow-utils
//! (`groupadd`/`useradd`) and busybox spellings of the same operations.

use hardbake_common::error::{HardbakeError, Result};

use super::ast::{AccountKind, Directive};

/// Longest account name accepted by the shadow tools.
const MAX_NAME_LEN: usize = 32;

/// Cursor over the words of a single command.
struct ArgCursor<'a> {
    words: &'a [String],
    pos: usize,
    line: usize,
}

impl<'a> ArgCursor<'a> {
    const fn new(words: &'a [String], line: usize) -> Self {
        Self {
            words,
            pos: 0,
            line,
        }
    }

    fn advance(&mut self) -> Option<&'a str> {
        let word = self.words.get(self.pos);
        if word.is_some() {
            self.pos += 1;
        }
        word.map(String::as_str)
    }

    fn expect_value(&mut self, flag: &str) -> Result<&'a str> {
        self.advance().ok_or_else(|| HardbakeError::Parse {
            line: self.line,
            message: format!("option {flag} requires a value"),
        })
    }
}

#[derive(Clone, Copy)]
enum Tool {
    Debian,
    Shadow,
}

struct CommandSpec {
    tool: Tool,
    creates_user: bool,
}

fn command_spec(program: &str) -> Option<CommandSpec> {
    let (tool, creates_user) = match program {
        "addgroup" => (Tool::Debian, false),
        "groupadd" => (Tool::Shadow, false),
        "adduser" => (Tool::Debian, true),
        "useradd" => (Tool::Shadow, true),
        _ => return None,
    };
    Some(CommandSpec { tool, creates_user })
}

fn is_system_flag(tool: Tool, flag: &str) -> bool {
    match tool {
        Tool::Debian => matches!(flag, "--system" | "-S"),
        Tool::Shadow => matches!(flag, "--system" | "-r"),
    }
}

fn group_flag_value<'a>(tool: Tool, flag: &'a str) -> Option<Option<&'a str>> {
    let long = match tool {
        Tool::Debian => "--ingroup",
        Tool::Shadow => "--gid",
    };
    let short = match tool {
        Tool::Debian => "-G",
        Tool::Shadow => "-g",
    };
    if flag == long || flag == short {
        return Some(None);
    }
    flag.strip_prefix(long)
        .and_then(|rest| rest.strip_prefix('='))
        .map(Some)
}

fn is_ignored_flag(flag: &str) -> bool {
    matches!(
        flag,
        "--disabled-password"
            | "--disabled-login"
            | "--no-create-home"
            | "--quiet"
            | "-q"
            | "-D"
            | "-H"
            | "-M"
    )
}

/// Validates an account name the way `adduser` does by default.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains characters
/// outside `[a-z0-9_-]` (with an optional trailing `$`).
pub fn validate_account_name(line: usize, name: &str) -> Result<()> {
    let body = name.strip_suffix('$').unwrap_or(name);
    let mut chars = body.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid_start || !valid_rest || name.len() > MAX_NAME_LEN {
        return Err(HardbakeError::Parse {
            line,
            message: format!("invalid account name: \"{name}\""),
        });
    }
    Ok(())
}

/// Turns one command (program plus arguments) into a directive.
///
/// # Errors
///
/// Returns an error for commands other than account creation, unknown
/// options, a missing or extra name, or a user without a primary group.
pub fn parse_account_command(line: usize, words: &[String]) -> Result<Directive> {
    let err = |message: String| HardbakeError::Parse { line, message };

    let Some((program, _)) = words.split_first() else {
        return Err(err("empty command in RUN".into()));
    };
    let spec = command_spec(program).ok_or_else(|| {
        err(format!(
            "unsupported RUN command \"{program}\": only addgroup, groupadd, adduser and useradd are allowed"
        ))
    })?;

    let mut cursor = ArgCursor::new(words, line);
    let _ = cursor.advance();

    let mut kind = AccountKind::Normal;
    let mut group = None;
    let mut names = Vec::new();

    while let Some(word) = cursor.advance() {
        let group_flag = if spec.creates_user {
            group_flag_value(spec.tool, word)
        } else {
            None
        };

        if is_system_flag(spec.tool, word) {
            kind = AccountKind::System;
        } else if let Some(inline) = group_flag {
            let value = match inline {
                Some(v) => v,
                None => cursor.expect_value(word)?,
            };
            group = Some(value.to_string());
        } else if is_ignored_flag(word) {
            tracing::debug!(line, flag = word, "ignoring account option");
        } else if word.starts_with('-') {
            return Err(err(format!("unsupported option for {program}: {word}")));
        } else {
            names.push(word);
        }
    }

    let name = match names.as_slice() {
        [name] => (*name).to_string(),
        [] => return Err(err(format!("{program} requires an account name"))),
        _ => {
            return Err(err(format!(
                "{program} takes exactly one account name, got {}",
                names.len()
            )));
        }
    };
    validate_account_name(line, &name)?;

    if !spec.creates_user {
        return Ok(Directive::GroupCreate { name, kind });
    }

    let group = group.ok_or_else(|| {
        err(format!(
            "{program} {name}: a primary group must be given explicitly"
        ))
    })?;
    validate_account_name(line, &group)?;
    Ok(Directive::UserCreate { name, group, kind })
}
