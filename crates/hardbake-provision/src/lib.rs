//! # hardbake-provision
//!
//! Turns a [`Recipe`](hardbake_recipe::Recipe) into an image.
//!
//! Handles:
//! - **Accounts**: Reading, extending and rendering the image's account database.
//! - **Context**: Build state moved through each directive, including the
//!   active identity and privilege level.
//! - **Provisioner**: Base resolution, validation, layer production and publishing.
//! - **Errors**: Failures located at the step that caused them.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod accounts;
pub mod context;
pub mod error;
pub mod provisioner;

pub use error::{ProvisionError, ProvisionErrorKind};
pub use provisioner::{Image, Plan, PlannedStep, Provisioner};
