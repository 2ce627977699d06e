//! Recipe execution.
//!
//! The provisioner resolves the base image, validates the recipe's identity
//! graph against the base's accounts, then applies directives in order. Each
//! directive yields exactly one layer; layers are stored content-addressed
//! and indexed by a chained cache key so unchanged recipe prefixes reuse
//! their layers.

use std::collections::BTreeMap;
use std::sync::Arc;

use hardbake_common::constants::MAX_IMAGE_LAYERS;
use hardbake_common::error::HardbakeError;
use hardbake_common::types::{BuildId, ImageId, ImageRef, Sha256Hash};
use hardbake_image::hash;
use hardbake_image::{ImageManifest, ImageRegistry, LayerRecord, LayerStore};
use hardbake_recipe::graph::{self, Origin, Violation};
use hardbake_recipe::{IdentityGraph, Recipe, Step};

use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionErrorKind};

/// A provisioned image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Content identifier.
    pub id: ImageId,
    /// Layers and runtime configuration.
    pub manifest: ImageManifest,
}

impl Image {
    /// Default working directory.
    #[must_use]
    pub fn workdir(&self) -> &str {
        &self.manifest.config.workdir
    }

    /// Default runtime identity.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.manifest.config.user
    }

    /// Default command.
    #[must_use]
    pub fn cmd(&self) -> &[String] {
        &self.manifest.config.cmd
    }

    /// Labels, sorted by key.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.manifest.config.labels
    }

    /// Layers, base layers first.
    #[must_use]
    pub fn layers(&self) -> &[LayerRecord] {
        &self.manifest.layers
    }
}

/// One directive as it would be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// 1-based step number; 1 is the base image.
    pub step: usize,
    /// Canonical directive text.
    pub directive: String,
    /// Layer cache key.
    pub cache_key: Sha256Hash,
    /// Whether the cache maps this key to a stored layer identical to the
    /// one the directive produces.
    pub cached: bool,
    /// Whether the directive only changes image metadata.
    pub metadata_only: bool,
}

/// What a build would do, computed without executing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Base image reference.
    pub base: ImageRef,
    /// Number of layers the base contributes.
    pub base_layers: usize,
    /// Identities the recipe creates, groups before their users.
    pub identities: Vec<String>,
    /// Directives in execution order.
    pub steps: Vec<PlannedStep>,
}

/// Executes recipes against a registry and a layer store.
#[derive(Clone)]
pub struct Provisioner {
    registry: Arc<dyn ImageRegistry>,
    store: Arc<dyn LayerStore>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates a provisioner over the given registry and store.
    #[must_use]
    pub fn new(registry: Arc<dyn ImageRegistry>, store: Arc<dyn LayerStore>) -> Self {
        Self { registry, store }
    }

    /// Executes a recipe and returns the resulting image without
    /// publishing it. Layers of successful steps stay in the store.
    ///
    /// # Errors
    ///
    /// Returns the first failure, located at its step. Nothing is
    /// published on failure.
    pub fn provision(&self, recipe: &Recipe) -> Result<Image, ProvisionError> {
        let build_id = BuildId::generate();
        let span = tracing::info_span!("provision", build = %build_id, base = %recipe.base);
        let _guard = span.enter();

        let (mut ctx, _) = self.prepare(recipe)?;
        for (index, step) in recipe.steps.iter().enumerate() {
            ctx = self
                .execute(ctx, step)
                .map_err(|kind| ProvisionError::at_step(recipe, index, kind))?;
        }

        let manifest = ctx.into_manifest();
        let id = manifest
            .id()
            .map_err(|e| ProvisionError::at_base(recipe, ProvisionErrorKind::Storage(e)))?;
        tracing::info!(
            id = %id.short(),
            layers = manifest.layers.len(),
            user = %manifest.config.user,
            "provisioning complete"
        );
        Ok(Image { id, manifest })
    }

    /// Executes a recipe and publishes the result under `reference`.
    /// `origin` is recorded as the image's source.
    ///
    /// # Errors
    ///
    /// Returns any provisioning failure, or a storage failure located one
    /// step past the last directive if publishing fails.
    pub fn build(
        &self,
        recipe: &Recipe,
        reference: &ImageRef,
        origin: &str,
    ) -> Result<Image, ProvisionError> {
        let image = self.provision(recipe)?;
        let _ = self
            .registry
            .publish(reference, &image.manifest, origin)
            .map_err(|e| ProvisionError {
                step: recipe.steps.len() + 2,
                line: 0,
                directive: format!("TAG {reference}"),
                kind: ProvisionErrorKind::Storage(e),
            })?;
        Ok(image)
    }

    /// Resolves and validates a recipe, then applies each directive without
    /// storing anything and reports its cache key and whether the cache
    /// already holds the layer it produces.
    ///
    /// # Errors
    ///
    /// Returns the failure a build would hit, located at its step.
    pub fn plan(&self, recipe: &Recipe) -> Result<Plan, ProvisionError> {
        let (mut ctx, identity_graph) = self.prepare(recipe)?;
        let base_layers = ctx.layers.len();
        let identities = identity_graph
            .creation_order()
            .into_iter()
            .filter(|n| n.origin != Origin::Base)
            .map(|n| {
                if n.is_group {
                    format!("group {}", n.name)
                } else {
                    format!("user {}", n.name)
                }
            })
            .collect();

        let mut steps = Vec::with_capacity(recipe.steps.len());
        for (index, step) in recipe.steps.iter().enumerate() {
            let at = |kind: ProvisionErrorKind| ProvisionError::at_step(recipe, index, kind);
            let directive = step.directive.to_string();
            let key = hash::chain_key(&ctx.chain_key, &directive);
            let (next, diff) = ctx.apply(&step.directive).map_err(at)?;
            let fresh = hash::hash_bytes(&diff.to_tar().map_err(|e| at(e.into()))?);
            let cached = self
                .store
                .cache_lookup(&key)
                .map_err(|e| at(e.into()))?
                .is_some_and(|digest| digest == fresh && self.store.contains(&digest));
            ctx = next;
            ctx.chain_key = key.clone();
            steps.push(PlannedStep {
                step: index + 2,
                directive,
                cache_key: key,
                cached,
                metadata_only: step.directive.is_metadata_only(),
            });
        }

        Ok(Plan {
            base: recipe.base.clone(),
            base_layers,
            identities,
            steps,
        })
    }

    /// Resolves the base, loads its state and validates the recipe.
    fn prepare(&self, recipe: &Recipe) -> Result<(BuildContext, IdentityGraph), ProvisionError> {
        let base_failure = |source: HardbakeError| {
            ProvisionError::at_base(
                recipe,
                ProvisionErrorKind::BaseResolutionFailure {
                    reference: recipe.base.to_string(),
                    source,
                },
            )
        };

        let base = self.registry.resolve(&recipe.base).map_err(base_failure)?;
        let ctx = BuildContext::from_base(&base, self.store.as_ref()).map_err(base_failure)?;
        tracing::info!(base = %recipe.base, layers = base.layers.len(), "base image resolved");

        let identity_graph = match graph::validate(recipe, &ctx.accounts.known()) {
            Ok(identity_graph) => identity_graph,
            Err(violation) => return Err(first_failure(recipe, ctx, violation)),
        };

        let total = ctx.layers.len() + recipe.steps.len();
        if total > MAX_IMAGE_LAYERS {
            let index = MAX_IMAGE_LAYERS.saturating_sub(ctx.layers.len());
            return Err(ProvisionError::at_step(
                recipe,
                index,
                ProvisionErrorKind::Storage(HardbakeError::Config {
                    message: format!(
                        "image would have {total} layers, the limit is {MAX_IMAGE_LAYERS}"
                    ),
                }),
            ));
        }
        Ok((ctx, identity_graph))
    }

    /// Applies one directive and stores its layer.
    fn execute(&self, ctx: BuildContext, step: &Step) -> Result<BuildContext, ProvisionErrorKind> {
        let directive = step.directive.to_string();
        let key = hash::chain_key(&ctx.chain_key, &directive);
        tracing::debug!(line = step.line, directive = %directive, "applying directive");

        let (mut ctx, diff) = ctx.apply(&step.directive)?;
        let blob = diff.to_tar()?;
        let fresh = hash::hash_bytes(&blob);

        let digest = match self.store.cache_lookup(&key)? {
            Some(cached) if cached == fresh && self.store.contains(&cached) => {
                tracing::debug!(directive = %directive, layer = %cached, "layer cache hit");
                cached
            }
            Some(cached) => {
                tracing::warn!(
                    directive = %directive,
                    cached = %cached,
                    fresh = %fresh,
                    "cached layer is missing or differs, storing rebuilt layer"
                );
                let digest = self.store.store(&blob)?;
                self.store.cache_record(&key, &digest)?;
                digest
            }
            None => {
                let digest = self.store.store(&blob)?;
                self.store.cache_record(&key, &digest)?;
                digest
            }
        };

        ctx.push_layer(
            key,
            LayerRecord {
                digest,
                size_bytes: blob.len() as u64,
                created_by: directive,
                empty: diff.is_empty(),
            },
        );
        Ok(ctx)
    }
}

/// Applies the directives ahead of a graph violation without storing
/// anything. A directive that fails there is reported instead, since a
/// build would stop at it first.
fn first_failure(recipe: &Recipe, mut ctx: BuildContext, violation: Violation) -> ProvisionError {
    for (index, step) in recipe.steps.iter().enumerate().take(violation.index()) {
        match ctx.apply(&step.directive) {
            Ok((next, _)) => ctx = next,
            Err(kind) => return ProvisionError::at_step(recipe, index, kind),
        }
    }
    ProvisionError::from_violation(recipe, violation)
}
