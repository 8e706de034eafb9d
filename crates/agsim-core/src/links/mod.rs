//! Dependency injection between models.
//!
//! A model declares the models it needs through [`Model::links`], returning one
//! [`LinkSlot`] per dependency. Each slot pairs a [`LinkDeclaration`] (what to look for)
//! with the [`Link`] field it fills. The resolver fills every slot in a subtree; the
//! model later dereferences its links through the event context.
//!
//! Searches are scoped: the nearest enclosing scope containing a match wins, so several
//! simulations under one root never see each other's models.

mod graph;

use crate::errors::{AgsimError, AgsimResult};
use crate::model::{short_type_name, Model};
use crate::simulation::Simulation;
use crate::tree::{ModelTree, NodeId};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

pub use graph::{LinkEdge, LinkGraph};

/// A resolved reference from one model to another.
///
/// `T` records the type the link was declared for; capability and untyped path links use
/// `dyn Model`.
pub struct Link<T: ?Sized = dyn Model> {
    target: Option<NodeId>,
    _marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized> Link<T> {
    pub fn new() -> Self {
        Self {
            target: None,
            _marker: PhantomData,
        }
    }

    /// The linked node, if the link has been resolved.
    pub fn id(&self) -> Option<NodeId> {
        self.target
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

impl<T: ?Sized> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Link<T> {}

impl<T: ?Sized> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(id) => write!(f, "Link({})", id),
            None => write!(f, "Link(unresolved)"),
        }
    }
}

/// A type a link can be declared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKey {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeKey {
    pub fn of<T: Model>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name::<T>(),
        }
    }

    fn matches(&self, tree: &ModelTree, node: NodeId) -> bool {
        tree.model(node)
            .map(|m| m.as_any().type_id() == self.id)
            .unwrap_or(false)
    }
}

/// What a link searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// The nearest model of a type, searching outward through enclosing scopes.
    Type(TypeKey),
    /// The nearest model that provides a named capability.
    Capability(&'static str),
    /// A model locator, optionally required to be of a type.
    Path {
        path: String,
        expected: Option<TypeKey>,
    },
    /// The nearest ancestor of a type.
    Ancestor(TypeKey),
    /// The first direct child of a type.
    Child(TypeKey),
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Type(key) => write!(f, "type {}", key.name),
            LinkTarget::Capability(name) => write!(f, "capability {}", name),
            LinkTarget::Path { path, .. } => write!(f, "path {}", path),
            LinkTarget::Ancestor(key) => write!(f, "ancestor {}", key.name),
            LinkTarget::Child(key) => write!(f, "child {}", key.name),
        }
    }
}

/// Metadata describing one dependency of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDeclaration {
    /// Name of the field being filled. Used in error messages and for name matching.
    pub field: &'static str,
    pub target: LinkTarget,
    /// Leave the link unset instead of failing when nothing matches.
    pub optional: bool,
    /// Only accept models whose name equals `field`.
    pub match_name: bool,
}

impl LinkDeclaration {
    pub fn new(field: &'static str, target: LinkTarget) -> Self {
        Self {
            field,
            target,
            optional: false,
            match_name: false,
        }
    }

    pub fn by_type<T: Model>(field: &'static str) -> Self {
        Self::new(field, LinkTarget::Type(TypeKey::of::<T>()))
    }

    pub fn child<T: Model>(field: &'static str) -> Self {
        Self::new(field, LinkTarget::Child(TypeKey::of::<T>()))
    }

    pub fn ancestor<T: Model>(field: &'static str) -> Self {
        Self::new(field, LinkTarget::Ancestor(TypeKey::of::<T>()))
    }

    fn accepts(&self, tree: &ModelTree, node: NodeId) -> bool {
        !self.match_name || tree.name(node) == self.field
    }
}

/// A declaration paired with the link it fills.
pub struct LinkSlot<'a> {
    pub declaration: LinkDeclaration,
    target: &'a mut Option<NodeId>,
}

impl<'a> LinkSlot<'a> {
    fn new<T: ?Sized>(declaration: LinkDeclaration, link: &'a mut Link<T>) -> Self {
        Self {
            declaration,
            target: &mut link.target,
        }
    }

    /// Nearest model of type `T` in the enclosing scopes.
    pub fn by_type<T: Model>(field: &'static str, link: &'a mut Link<T>) -> Self {
        Self::new(LinkDeclaration::by_type::<T>(field), link)
    }

    /// Nearest model that declares a capability.
    pub fn by_capability(
        field: &'static str,
        capability: &'static str,
        link: &'a mut Link<dyn Model>,
    ) -> Self {
        Self::new(
            LinkDeclaration::new(field, LinkTarget::Capability(capability)),
            link,
        )
    }

    /// The model at a path, which must be of type `T`.
    pub fn by_path<T: Model>(
        field: &'static str,
        path: impl Into<String>,
        link: &'a mut Link<T>,
    ) -> Self {
        Self::new(
            LinkDeclaration::new(
                field,
                LinkTarget::Path {
                    path: path.into(),
                    expected: Some(TypeKey::of::<T>()),
                },
            ),
            link,
        )
    }

    /// The model at a path, of any type.
    pub fn by_path_any(
        field: &'static str,
        path: impl Into<String>,
        link: &'a mut Link<dyn Model>,
    ) -> Self {
        Self::new(
            LinkDeclaration::new(
                field,
                LinkTarget::Path {
                    path: path.into(),
                    expected: None,
                },
            ),
            link,
        )
    }

    pub fn ancestor<T: Model>(field: &'static str, link: &'a mut Link<T>) -> Self {
        Self::new(LinkDeclaration::ancestor::<T>(field), link)
    }

    pub fn child<T: Model>(field: &'static str, link: &'a mut Link<T>) -> Self {
        Self::new(LinkDeclaration::child::<T>(field), link)
    }

    pub fn optional(mut self) -> Self {
        self.declaration.optional = true;
        self
    }

    pub fn match_name(mut self) -> Self {
        self.declaration.match_name = true;
        self
    }
}

/// The binding of one declared link after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub model: NodeId,
    pub field: &'static str,
    pub target: Option<NodeId>,
}

/// The dependency resolver.
pub struct Links;

impl Links {
    /// Fill every link declared by the models under `root` (inclusive).
    ///
    /// Resolution is a pure function of the tree shape, so resolving an already resolved
    /// tree yields the same bindings. The first required link that cannot be satisfied
    /// aborts resolution.
    pub fn resolve(tree: &mut ModelTree, root: NodeId) -> AgsimResult<()> {
        let nodes: Vec<NodeId> = tree.subtree(root).collect();
        for node in nodes {
            let mut model = tree.take_model(node)?;
            let result = Self::resolve_model(tree, node, model.as_mut());
            tree.restore_model(node, model)?;
            result?;
        }
        Ok(())
    }

    fn resolve_model(tree: &ModelTree, node: NodeId, model: &mut dyn Model) -> AgsimResult<()> {
        for slot in model.links() {
            let found = Self::resolve_declaration(tree, node, &slot.declaration)?;
            if found.is_none() && !slot.declaration.optional {
                return Err(AgsimError::MissingDependency {
                    model: tree.full_path(node),
                    field: slot.declaration.field.to_string(),
                    target: slot.declaration.target.to_string(),
                });
            }
            *slot.target = found;
        }
        Ok(())
    }

    /// Search for the model satisfying one declaration made by the model at `from`.
    ///
    /// Returns `Ok(None)` when nothing matches. Path links whose target exists but has the
    /// wrong type are an error regardless of optionality.
    pub fn resolve_declaration(
        tree: &ModelTree,
        from: NodeId,
        declaration: &LinkDeclaration,
    ) -> AgsimResult<Option<NodeId>> {
        let found = match &declaration.target {
            LinkTarget::Type(key) => Self::search_scopes(tree, from, |n| {
                key.matches(tree, n) && declaration.accepts(tree, n)
            }),
            LinkTarget::Capability(capability) => Self::search_scopes(tree, from, |n| {
                tree.model(n)
                    .map(|m| m.provides(capability))
                    .unwrap_or(false)
                    && declaration.accepts(tree, n)
            }),
            LinkTarget::Ancestor(key) => tree
                .ancestors(from)
                .find(|a| key.matches(tree, *a) && declaration.accepts(tree, *a)),
            LinkTarget::Child(key) => tree
                .children(from)
                .iter()
                .copied()
                .find(|c| key.matches(tree, *c) && declaration.accepts(tree, *c)),
            LinkTarget::Path { path, expected } => match tree.find_by_path(from, path) {
                Ok(id) => {
                    if let Some(key) = expected {
                        if !key.matches(tree, id) {
                            return Err(AgsimError::WrongType {
                                path: path.clone(),
                                expected: key.name.to_string(),
                                found: tree.node(id)?.type_name().to_string(),
                            });
                        }
                    }
                    Some(id)
                }
                Err(AgsimError::NodeNotFound { .. }) => None,
                Err(e) => return Err(e),
            },
        };
        Ok(found)
    }

    /// Search `from`'s subtree, then each ancestor's subtree outward, in pre-order.
    ///
    /// The querying model itself never matches, and the search never leaves the
    /// enclosing simulation.
    fn search_scopes<F>(tree: &ModelTree, from: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(NodeId) -> bool,
    {
        let mut scopes = Vec::new();
        for scope in std::iter::once(from).chain(tree.ancestors(from)) {
            scopes.push(scope);
            if tree.is::<Simulation>(scope) {
                break;
            }
        }
        scopes.into_iter().find_map(|scope| {
            tree.subtree(scope)
                .find(|candidate| *candidate != from && predicate(*candidate))
        })
    }

    /// Clear every link under `root`.
    pub fn unresolve(tree: &mut ModelTree, root: NodeId) -> AgsimResult<()> {
        let nodes: Vec<NodeId> = tree.subtree(root).collect();
        for node in nodes {
            for slot in tree.model_mut(node)?.links() {
                *slot.target = None;
            }
        }
        Ok(())
    }

    /// The current binding of every declared link under `root`, in pre-order.
    pub fn bindings(tree: &mut ModelTree, root: NodeId) -> AgsimResult<Vec<Binding>> {
        let nodes: Vec<NodeId> = tree.subtree(root).collect();
        let mut bindings = Vec::new();
        for node in nodes {
            for slot in tree.model_mut(node)?.links() {
                bindings.push(Binding {
                    model: node,
                    field: slot.declaration.field,
                    target: *slot.target,
                });
            }
        }
        Ok(bindings)
    }
}
