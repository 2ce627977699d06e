//! Provisioning failures.
//!
//! Every failure names the step it happened at. Step 1 is the base image
//! (`FROM`); the directive at `Recipe::steps[i]` is step `i + 2`.

use hardbake_common::error::HardbakeError;
use hardbake_recipe::{AccountKind, Recipe, Violation};
use thiserror::Error;

/// What went wrong.
#[derive(Debug, Error)]
pub enum ProvisionErrorKind {
    /// The base image could not be resolved or its layers could not be read.
    #[error("base image {reference} could not be resolved: {source}")]
    BaseResolutionFailure {
        /// The base reference.
        reference: String,
        /// Underlying cause.
        #[source]
        source: HardbakeError,
    },

    /// An account name exists with incompatible attributes.
    #[error("name conflict for \"{name}\": {reason}")]
    NameConflict {
        /// Conflicting name.
        name: String,
        /// What is incompatible.
        reason: String,
    },

    /// A user names a group that does not exist at that point.
    #[error("group \"{group}\" required by user \"{user}\" does not exist")]
    MissingDependency {
        /// Missing group.
        group: String,
        /// User that needs it.
        user: String,
    },

    /// A switch names an account that does not exist at that point.
    #[error("account \"{name}\" does not exist")]
    UnknownAccount {
        /// Account name.
        name: String,
    },

    /// A working directory is not absolute.
    #[error("working directory must be an absolute path: \"{path}\"")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// A directive would regain privileges after they were dropped.
    #[error("privilege escalation: {reason}")]
    PrivilegeEscalation {
        /// What was attempted.
        reason: String,
    },

    /// No id is left in the range for this account kind.
    #[error("no free {0} id left")]
    IdsExhausted(AccountKind),

    /// Layer storage or serialization failed.
    #[error(transparent)]
    Storage(#[from] HardbakeError),
}

/// A provisioning failure located at a step.
#[derive(Debug, Error)]
#[error("step {step} (line {line}) `{directive}`: {kind}")]
pub struct ProvisionError {
    /// 1-based step number; 1 is the base image.
    pub step: usize,
    /// Source line of the step, `0` for recipes built in code.
    pub line: usize,
    /// Canonical text of the failing directive.
    pub directive: String,
    /// The failure.
    pub kind: ProvisionErrorKind,
}

impl ProvisionError {
    /// Failure at the base image step.
    #[must_use]
    pub fn at_base(recipe: &Recipe, kind: ProvisionErrorKind) -> Self {
        Self {
            step: 1,
            line: recipe.base_line,
            directive: format!("FROM {}", recipe.base),
            kind,
        }
    }

    /// Failure at `recipe.steps[index]`.
    #[must_use]
    pub fn at_step(recipe: &Recipe, index: usize, kind: ProvisionErrorKind) -> Self {
        let (line, directive) = recipe
            .steps
            .get(index)
            .map_or((0, String::new()), |s| (s.line, s.directive.to_string()));
        Self {
            step: index + 2,
            line,
            directive,
            kind,
        }
    }

    /// Converts a validation violation into a located failure.
    #[must_use]
    pub fn from_violation(recipe: &Recipe, violation: Violation) -> Self {
        let index = violation.index();
        let kind = match violation {
            Violation::MissingDependency { group, user, .. } => {
                ProvisionErrorKind::MissingDependency { group, user }
            }
            Violation::UnknownAccount { name, .. } => ProvisionErrorKind::UnknownAccount { name },
            Violation::InvalidPath { path, .. } => ProvisionErrorKind::InvalidPath { path },
        };
        Self::at_step(recipe, index, kind)
    }
}
