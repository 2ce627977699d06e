//! Directive model for parsed recipes.

use std::fmt;

use hardbake_common::types::ImageRef;
use serde::{Deserialize, Serialize};

/// A complete recipe: the base image followed by ordered directives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Base image reference from the `FROM` instruction.
    pub base: ImageRef,
    /// Source line of the `FROM` instruction.
    pub base_line: usize,
    /// Directives in declaration order.
    pub steps: Vec<Step>,
}

impl Recipe {
    /// Returns every label in declaration order. Later keys shadow earlier
    /// ones when the image config is assembled.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.steps.iter().filter_map(|s| match &s.directive {
            Directive::Label { key, value } => Some((key.as_str(), value.as_str())),
            _ => None,
        })
    }
}

/// A directive together with the line it was declared on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based source line, `0` for recipes built in code.
    pub line: usize,
    /// The directive itself.
    pub directive: Directive,
}

/// Whether an account is a service identity or an interactive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Service account: low id range, no home, no login shell.
    System,
    /// Regular account.
    Normal,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// A single provisioning directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Directive {
    /// Free-form metadata; no runtime effect.
    Label {
        /// Label key.
        key: String,
        /// Label value.
        value: String,
    },
    /// Default working directory for later directives and the runtime.
    Workdir {
        /// Directory path, must be absolute.
        path: String,
    },
    /// Adds a group entry.
    GroupCreate {
        /// Group name.
        name: String,
        /// Group kind.
        kind: AccountKind,
    },
    /// Adds a user entry whose primary group is `group`.
    UserCreate {
        /// User name.
        name: String,
        /// Primary group, which must already exist.
        group: String,
        /// Account kind.
        kind: AccountKind,
    },
    /// Changes the effective identity for later directives and the runtime.
    UserSwitch {
        /// Account name.
        name: String,
    },
    /// Default argument vector run when the image starts.
    Cmd {
        /// Argument vector.
        argv: Vec<String>,
    },
}

impl Directive {
    /// Whether this directive only touches image metadata and leaves the
    /// filesystem untouched.
    #[must_use]
    pub const fn is_metadata_only(&self) -> bool {
        matches!(
            self,
            Self::Label { .. } | Self::UserSwitch { .. } | Self::Cmd { .. }
        )
    }

    /// Whether this directive writes the account database.
    #[must_use]
    pub const fn creates_identity(&self) -> bool {
        matches!(self, Self::GroupCreate { .. } | Self::UserCreate { .. })
    }
}

/// Canonical text form. Used in log lines, error reports and layer cache
/// keys, so it must stay stable for a given directive.
impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label { key, value } => write!(f, "LABEL {key}={}", quote(value)),
            Self::Workdir { path } => write!(f, "WORKDIR {path}"),
            Self::GroupCreate { name, kind } => match kind {
                AccountKind::System => write!(f, "RUN addgroup --system {name}"),
                AccountKind::Normal => write!(f, "RUN addgroup {name}"),
            },
            Self::UserCreate { name, group, kind } => match kind {
                AccountKind::System => {
                    write!(f, "RUN adduser --system --ingroup {group} {name}")
                }
                AccountKind::Normal => write!(f, "RUN adduser --ingroup {group} {name}"),
            },
            Self::UserSwitch { name } => write!(f, "USER {name}"),
            Self::Cmd { argv } => {
                let quoted: Vec<String> = argv.iter().map(|a| quote(a)).collect();
                write!(f, "CMD [{}]", quoted.join(", "))
            }
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical() {
        let cases = [
            (
                Directive::Label {
                    key: "maintainer".into(),
                    value: "a \"b\"".into(),
                },
                r#"LABEL maintainer="a \"b\"""#,
            ),
            (
                Directive::Workdir { path: "/app".into() },
                "WORKDIR /app",
            ),
            (
                Directive::GroupCreate {
                    name: "appgroup".into(),
                    kind: AccountKind::System,
                },
                "RUN addgroup --system appgroup",
            ),
            (
                Directive::UserCreate {
                    name: "appuser".into(),
                    group: "appgroup".into(),
                    kind: AccountKind::System,
                },
                "RUN adduser --system --ingroup appgroup appuser",
            ),
            (
                Directive::UserSwitch {
                    name: "appuser".into(),
                },
                "USER appuser",
            ),
            (
                Directive::Cmd {
                    argv: vec!["sh".into(), "-c".into(), "echo hi".into()],
                },
                r#"CMD ["sh", "-c", "echo hi"]"#,
            ),
        ];
        for (directive, expected) in cases {
            assert_eq!(directive.to_string(), expected);
        }
    }

    #[test]
    fn metadata_only_classification() {
        assert!(Directive::UserSwitch { name: "x".into() }.is_metadata_only());
        assert!(!Directive::Workdir { path: "/x".into() }.is_metadata_only());
        assert!(
            Directive::GroupCreate {
                name: "g".into(),
                kind: AccountKind::Normal
            }
            .creates_identity()
        );
    }
}
