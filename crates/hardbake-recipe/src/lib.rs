//! # hardbake-recipe
//!
//! Declarative provisioning recipes for hardbake.
//!
//! Handles:
//! - **Parser**: Lexing and parsing of recipe files into a [`Recipe`].
//! - **Builder**: Fluent construction of recipes from Rust code.
//! - **Graph**: Identity dependency graph (users pointing at their groups).
//! - **Validation**: Ordering checks run before any directive executes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod graph;
pub mod parser;

pub use builder::RecipeBuilder;
pub use graph::{IdentityGraph, KnownAccounts, Violation};
pub use parser::ast::{AccountKind, Directive, Recipe, Step};
pub use parser::parse_recipe;
