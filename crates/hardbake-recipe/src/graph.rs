//! Identity dependency graph using `petgraph`.
//!
//! Every group and user a recipe touches becomes a node; every
//! `UserCreate` adds an edge from its primary group to the user. The graph
//! is checked against declaration order before any directive executes, so
//! an out-of-order recipe fails up front instead of halfway through.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{Graph, NodeIndex};
use thiserror::Error;

use crate::parser::ast::{Directive, Recipe};

/// Accounts already present in the base image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownAccounts {
    /// User names.
    pub users: HashSet<String>,
    /// Group names.
    pub groups: HashSet<String>,
}

impl KnownAccounts {
    /// The account set of a base image that only has `root`.
    #[must_use]
    pub fn root_only() -> Self {
        Self {
            users: HashSet::from(["root".to_string()]),
            groups: HashSet::from(["root".to_string()]),
        }
    }
}

/// An ordering violation found before execution. `index` is the position of
/// the offending directive in [`Recipe::steps`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// A user references a group that is not created before it.
    #[error("group \"{group}\" required by user \"{user}\" does not exist yet")]
    MissingDependency {
        /// Offending directive.
        index: usize,
        /// Missing group.
        group: String,
        /// User that needs it.
        user: String,
    },
    /// A switch names an account that does not exist at that point.
    #[error("account \"{name}\" does not exist")]
    UnknownAccount {
        /// Offending directive.
        index: usize,
        /// Account name.
        name: String,
    },
    /// A working directory is not absolute.
    #[error("working directory must be an absolute path: \"{path}\"")]
    InvalidPath {
        /// Offending directive.
        index: usize,
        /// The rejected path.
        path: String,
    },
}

impl Violation {
    /// Position of the offending directive in the recipe's steps.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::MissingDependency { index, .. }
            | Self::UnknownAccount { index, .. }
            | Self::InvalidPath { index, .. } => *index,
        }
    }
}

/// Where an identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Present in the base image.
    Base,
    /// First created by the directive at this index.
    Step(usize),
    /// Referenced but never created.
    Undeclared,
}

impl Origin {
    /// Whether the identity exists by the time directive `index` runs.
    #[must_use]
    pub const fn exists_before(self, index: usize) -> bool {
        match self {
            Self::Base => true,
            Self::Step(at) => at < index,
            Self::Undeclared => false,
        }
    }
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityNode {
    /// Account or group name.
    pub name: String,
    /// `true` for groups, `false` for users.
    pub is_group: bool,
    /// Where the identity comes from.
    pub origin: Origin,
}

/// Dependency graph of the identities a recipe creates or references.
#[derive(Debug)]
pub struct IdentityGraph {
    graph: Graph<IdentityNode, usize>,
    groups: HashMap<String, NodeIndex>,
    users: HashMap<String, NodeIndex>,
}

impl IdentityGraph {
    /// Builds the graph for `recipe` on top of the base image's accounts.
    #[must_use]
    pub fn build(recipe: &Recipe, known: &KnownAccounts) -> Self {
        let mut this = Self {
            graph: Graph::new(),
            groups: HashMap::new(),
            users: HashMap::new(),
        };

        for (index, step) in recipe.steps.iter().enumerate() {
            match &step.directive {
                Directive::GroupCreate { name, .. } => {
                    let _ = this.declare(name, true, index, known);
                }
                Directive::UserCreate { name, group, .. } => {
                    let user = this.declare(name, false, index, known);
                    let group = this.reference(group, true, known);
                    let _ = this.graph.add_edge(group, user, index);
                }
                Directive::UserSwitch { name } => {
                    let _ = this.reference(name, false, known);
                }
                _ => {}
            }
        }

        this
    }

    fn table(&mut self, is_group: bool) -> &mut HashMap<String, NodeIndex> {
        if is_group { &mut self.groups } else { &mut self.users }
    }

    fn base_origin(name: &str, is_group: bool, known: &KnownAccounts) -> Origin {
        let present = if is_group {
            known.groups.contains(name)
        } else {
            known.users.contains(name)
        };
        if present { Origin::Base } else { Origin::Undeclared }
    }

    /// Records a creation; the earliest creation wins unless the base
    /// already has the identity.
    fn declare(
        &mut self,
        name: &str,
        is_group: bool,
        index: usize,
        known: &KnownAccounts,
    ) -> NodeIndex {
        let node = self.reference(name, is_group, known);
        if let Some(weight) = self.graph.node_weight_mut(node) {
            if weight.origin == Origin::Undeclared {
                weight.origin = Origin::Step(index);
            }
        }
        node
    }

    fn reference(&mut self, name: &str, is_group: bool, known: &KnownAccounts) -> NodeIndex {
        if let Some(&node) = self.table(is_group).get(name) {
            return node;
        }
        let node = self.graph.add_node(IdentityNode {
            name: name.to_string(),
            is_group,
            origin: Self::base_origin(name, is_group, known),
        });
        let _ = self.table(is_group).insert(name.to_string(), node);
        node
    }

    /// Origin of a group, if the recipe mentions it.
    #[must_use]
    pub fn group_origin(&self, name: &str) -> Option<Origin> {
        self.groups
            .get(name)
            .and_then(|&n| self.graph.node_weight(n))
            .map(|n| n.origin)
    }

    /// Origin of a user, if the recipe mentions it.
    #[must_use]
    pub fn user_origin(&self, name: &str) -> Option<Origin> {
        self.users
            .get(name)
            .and_then(|&n| self.graph.node_weight(n))
            .map(|n| n.origin)
    }

    /// Returns identities so that every group precedes the users that
    /// depend on it.
    #[must_use]
    pub fn creation_order(&self) -> Vec<&IdentityNode> {
        // Edges only run group -> user, so the graph is always acyclic.
        petgraph::algo::toposort(&self.graph, None)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }
}

/// Checks `recipe` for ordering violations given the base image's accounts.
///
/// Directives are inspected in declaration order and the first violation is
/// returned. Only identity ordering and paths are checked here; name
/// conflicts and privilege drops surface when directives are applied.
///
/// # Errors
///
/// Returns the first [`Violation`] found.
pub fn validate(recipe: &Recipe, known: &KnownAccounts) -> Result<IdentityGraph, Violation> {
    tracing::info!(base = %recipe.base, "validating recipe ordering");
    let graph = IdentityGraph::build(recipe, known);

    for (index, step) in recipe.steps.iter().enumerate() {
        match &step.directive {
            Directive::Workdir { path } if !path.starts_with('/') => {
                return Err(Violation::InvalidPath {
                    index,
                    path: path.clone(),
                });
            }
            Directive::UserCreate { name, group, .. } => {
                let ok = graph
                    .group_origin(group)
                    .is_some_and(|o| o.exists_before(index));
                if !ok {
                    return Err(Violation::MissingDependency {
                        index,
                        group: group.clone(),
                        user: name.clone(),
                    });
                }
            }
            Directive::UserSwitch { name } => {
                let ok = graph
                    .user_origin(name)
                    .is_some_and(|o| o.exists_before(index));
                if !ok {
                    return Err(Violation::UnknownAccount {
                        index,
                        name: name.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecipeBuilder;

    fn java_recipe() -> RecipeBuilder {
        RecipeBuilder::from_base("openjdk:17-jdk-slim-buster").expect("base")
    }

    #[test]
    fn well_ordered_recipe_validates() {
        let recipe = java_recipe()
            .workdir("/app")
            .system_group("appgroup")
            .system_user("appuser", "appgroup")
            .switch_user("appuser")
            .cmd(["java"])
            .build();
        assert!(validate(&recipe, &KnownAccounts::root_only()).is_ok());
    }

    #[test]
    fn user_before_group_is_missing_dependency() {
        let recipe = java_recipe()
            .workdir("/app")
            .system_user("appuser", "appgroup")
            .system_group("appgroup")
            .build();
        let err = validate(&recipe, &KnownAccounts::root_only()).unwrap_err();
        assert_eq!(
            err,
            Violation::MissingDependency {
                index: 1,
                group: "appgroup".into(),
                user: "appuser".into(),
            }
        );
    }

    #[test]
    fn switch_before_create_is_unknown_account() {
        let recipe = java_recipe()
            .system_group("appgroup")
            .switch_user("appuser")
            .system_user("appuser", "appgroup")
            .build();
        let err = validate(&recipe, &KnownAccounts::root_only()).unwrap_err();
        assert!(matches!(err, Violation::UnknownAccount { index: 1, .. }), "got: {err:?}");
    }

    #[test]
    fn switch_to_base_account_is_allowed() {
        let mut known = KnownAccounts::root_only();
        let _ = known.users.insert("nobody".into());
        let recipe = java_recipe().switch_user("nobody").build();
        assert!(validate(&recipe, &known).is_ok());
    }

    #[test]
    fn user_in_base_group_is_allowed() {
        let mut known = KnownAccounts::root_only();
        let _ = known.groups.insert("nogroup".into());
        let recipe = java_recipe().system_user("svc", "nogroup").build();
        assert!(validate(&recipe, &known).is_ok());
    }

    #[test]
    fn relative_workdir_is_invalid_path() {
        let recipe = java_recipe().workdir("app").build();
        let err = validate(&recipe, &KnownAccounts::root_only()).unwrap_err();
        assert!(matches!(err, Violation::InvalidPath { index: 0, .. }));
        assert!(err.to_string().contains("absolute"), "got: {err}");
    }

    #[test]
    fn first_violation_in_declaration_order_wins() {
        let recipe = java_recipe()
            .switch_user("ghost")
            .workdir("relative")
            .build();
        let err = validate(&recipe, &KnownAccounts::root_only()).unwrap_err();
        assert_eq!(err.index(), 0);
    }

    #[test]
    fn creation_order_puts_groups_first() {
        let recipe = java_recipe()
            .system_group("a")
            .system_group("b")
            .system_user("u1", "b")
            .system_user("u2", "a")
            .build();
        let graph = validate(&recipe, &KnownAccounts::root_only()).expect("valid");
        let order: Vec<&str> = graph
            .creation_order()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).expect(name);
        assert!(pos("b") < pos("u1"), "{order:?}");
        assert!(pos("a") < pos("u2"), "{order:?}");
    }

    #[test]
    fn origins_are_tracked() {
        let recipe = java_recipe()
            .system_group("appgroup")
            .system_user("appuser", "appgroup")
            .build();
        let graph = IdentityGraph::build(&recipe, &KnownAccounts::root_only());
        assert_eq!(graph.group_origin("appgroup"), Some(Origin::Step(0)));
        assert_eq!(graph.user_origin("appuser"), Some(Origin::Step(1)));
        assert_eq!(graph.group_origin("missing"), None);
    }
}
