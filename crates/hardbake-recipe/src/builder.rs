//! Fluent API for assembling recipes in code.

use hardbake_common::error::Result;
use hardbake_common::types::ImageRef;

use crate::parser::ast::{AccountKind, Directive, Recipe, Step};

/// Builder for a [`Recipe`]. Directives keep the order they are added in.
#[derive(Debug, Clone)]
pub struct RecipeBuilder {
    base: ImageRef,
    steps: Vec<Step>,
}

impl RecipeBuilder {
    /// Starts a recipe on top of `base`.
    #[must_use]
    pub const fn new(base: ImageRef) -> Self {
        Self {
            base,
            steps: Vec::new(),
        }
    }

    /// Starts a recipe from a reference string such as `gcc:latest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed.
    pub fn from_base(reference: &str) -> Result<Self> {
        Ok(Self::new(ImageRef::parse(reference)?))
    }

    /// Appends an arbitrary directive.
    #[must_use]
    pub fn directive(mut self, directive: Directive) -> Self {
        self.steps.push(Step { line: 0, directive });
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn label(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directive(Directive::Label {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Sets the working directory.
    #[must_use]
    pub fn workdir(self, path: impl Into<String>) -> Self {
        self.directive(Directive::Workdir { path: path.into() })
    }

    /// Creates a system group.
    #[must_use]
    pub fn system_group(self, name: impl Into<String>) -> Self {
        self.directive(Directive::GroupCreate {
            name: name.into(),
            kind: AccountKind::System,
        })
    }

    /// Creates a system user in `group`.
    #[must_use]
    pub fn system_user(self, name: impl Into<String>, group: impl Into<String>) -> Self {
        self.directive(Directive::UserCreate {
            name: name.into(),
            group: group.into(),
            kind: AccountKind::System,
        })
    }

    /// Switches the active user.
    #[must_use]
    pub fn switch_user(self, name: impl Into<String>) -> Self {
        self.directive(Directive::UserSwitch { name: name.into() })
    }

    /// Sets the default command.
    #[must_use]
    pub fn cmd<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directive(Directive::Cmd {
            argv: argv.into_iter().map(Into::into).collect(),
        })
    }

    /// Finishes the recipe.
    #[must_use]
    pub fn build(self) -> Recipe {
        Recipe {
            base: self.base,
            base_line: 0,
            steps: self.steps,
        }
    }
}
