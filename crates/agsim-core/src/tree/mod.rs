//! The model tree.
//!
//! Models are stored in an arena and addressed by [`NodeId`] handles. A node owns its
//! children; the parent handle is only used for navigation. Removing a node drops its
//! whole subtree and frees the slots so stale handles report [`AgsimError::InvalidNode`]
//! instead of aliasing a different model.
//!
//! All traversals are pre-order and follow child insertion order.

mod path;

use crate::errors::{AgsimError, AgsimResult};
use crate::model::{short_type_name, Model, ModelSpec};
use crate::value::VariableValue;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

pub use path::{split_property, ModelPath, PathAnchor};

/// Handle to a node of a [`ModelTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    hidden: bool,
    include_in_documentation: bool,
    /// `None` while the model is checked out to handle an event.
    model: Option<Box<dyn Model>>,
    type_name: &'static str,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn include_in_documentation(&self) -> bool {
        self.include_in_documentation
    }

    /// Unqualified type name of the model held by this node.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The model, unless it is currently checked out.
    pub fn model(&self) -> Option<&dyn Model> {
        self.model.as_deref()
    }

    /// Whether this node holds a model of type `T`.
    pub fn is<T: Model>(&self) -> bool {
        self.model()
            .map(|m| m.as_any().is::<T>())
            .unwrap_or(false)
    }
}

/// An ordered, rooted tree of models.
#[derive(Debug, Default)]
pub struct ModelTree {
    nodes: Vec<Option<Node>>,
    root: Option<NodeId>,
}

impl ModelTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a deserialized specification.
    pub fn from_spec(spec: ModelSpec) -> Self {
        let mut tree = Self::new();
        let root = tree.insert_spec(None, spec);
        tree.root = Some(root);
        tree
    }

    /// Create the root node of an empty tree.
    pub fn add_root(&mut self, name: impl Into<String>, model: impl Model) -> AgsimResult<NodeId> {
        if self.root.is_some() {
            return Err(AgsimError::Error("Tree already has a root".to_string()));
        }
        let id = self.insert(None, name.into(), Box::new(model), true);
        self.root = Some(id);
        Ok(id)
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> AgsimResult<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(AgsimError::InvalidNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> AgsimResult<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(AgsimError::InvalidNode(id.0))
    }

    /// Name of a node, or an empty string for a stale handle.
    pub fn name(&self, id: NodeId) -> &str {
        self.node(id).map(|n| n.name()).unwrap_or("")
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> AgsimResult<()> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) -> AgsimResult<()> {
        self.node_mut(id)?.hidden = hidden;
        Ok(())
    }

    /// Borrow the model at `id`.
    pub fn model(&self, id: NodeId) -> AgsimResult<&dyn Model> {
        let node = self.node(id)?;
        node.model
            .as_deref()
            .ok_or_else(|| AgsimError::ModelBusy(self.full_path(id)))
    }

    pub fn model_mut(&mut self, id: NodeId) -> AgsimResult<&mut dyn Model> {
        let path = self.full_path(id);
        let node = self.node_mut(id)?;
        match node.model.as_deref_mut() {
            Some(model) => Ok(model),
            None => Err(AgsimError::ModelBusy(path)),
        }
    }

    /// Borrow the model at `id` as a concrete type.
    pub fn get<T: Model>(&self, id: NodeId) -> AgsimResult<&T> {
        let model = self.model(id)?;
        model
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| self.wrong_type::<T>(id))
    }

    pub fn get_mut<T: Model>(&mut self, id: NodeId) -> AgsimResult<&mut T> {
        let error = self.wrong_type::<T>(id);
        self.model_mut(id)?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(error)
    }

    fn wrong_type<T: Model>(&self, id: NodeId) -> AgsimError {
        AgsimError::WrongType {
            path: self.full_path(id),
            expected: short_type_name::<T>().to_string(),
            found: self.node(id).map(|n| n.type_name).unwrap_or("?").to_string(),
        }
    }

    pub fn is<T: Model>(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.is::<T>()).unwrap_or(false)
    }

    /// Remove the model from its node so it can be mutated alongside the rest of the tree.
    ///
    /// The node keeps its place in the tree. Every call must be paired with
    /// [`ModelTree::restore_model`].
    pub fn take_model(&mut self, id: NodeId) -> AgsimResult<Box<dyn Model>> {
        let path = self.full_path(id);
        self.node_mut(id)?
            .model
            .take()
            .ok_or(AgsimError::ModelBusy(path))
    }

    pub fn restore_model(&mut self, id: NodeId, model: Box<dyn Model>) -> AgsimResult<()> {
        self.node_mut(id)?.model = Some(model);
        Ok(())
    }

    fn insert(
        &mut self,
        parent: Option<NodeId>,
        name: String,
        model: Box<dyn Model>,
        include_in_documentation: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let type_name = model.type_name();
        self.nodes.push(Some(Node {
            name,
            parent,
            children: Vec::new(),
            hidden: false,
            include_in_documentation,
            model: Some(model),
            type_name,
        }));
        id
    }

    fn insert_spec(&mut self, parent: Option<NodeId>, spec: ModelSpec) -> NodeId {
        let ModelSpec {
            name,
            include_in_documentation,
            model,
            children,
        } = spec;
        let id = self.insert(parent, name, model, include_in_documentation);
        for child in children {
            let child_id = self.insert_spec(Some(id), child);
            if let Some(Some(node)) = self.nodes.get_mut(id.0) {
                node.children.push(child_id);
            }
        }
        id
    }

    /// Append a new model as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        model: impl Model,
    ) -> AgsimResult<NodeId> {
        self.node(parent)?;
        let id = self.insert(Some(parent), name.into(), Box::new(model), true);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Graft a deserialized subtree as the last child of `parent`.
    pub fn add_spec(&mut self, parent: NodeId, spec: ModelSpec) -> AgsimResult<NodeId> {
        self.node(parent)?;
        let id = self.insert_spec(Some(parent), spec);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Detach `child` from `parent` and drop its subtree.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> AgsimResult<()> {
        let position = self
            .children(parent)
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| {
                AgsimError::Error(format!(
                    "{} is not a child of {}",
                    self.full_path(child),
                    self.full_path(parent)
                ))
            })?;
        self.node_mut(parent)?.children.remove(position);
        self.drop_subtree(child);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let doomed: Vec<NodeId> = self.subtree(id).collect();
        for node in doomed {
            if let Some(slot) = self.nodes.get_mut(node.0) {
                *slot = None;
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    /// Re-parent a node, appending it as the last child of `new_parent`.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> AgsimResult<()> {
        self.node(new_parent)?;
        if self.is_within(new_parent, id) {
            return Err(AgsimError::Error(format!(
                "Cannot move {} beneath itself",
                self.full_path(id)
            )));
        }
        let old_parent = self.node(id)?.parent.ok_or_else(|| {
            AgsimError::Error("The root of a tree cannot be moved".to_string())
        })?;
        self.node_mut(old_parent)?.children.retain(|c| *c != id);
        self.node_mut(new_parent)?.children.push(id);
        self.node_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Replace the subtree at `id` with `spec`, keeping its position among its siblings.
    pub fn replace_subtree(&mut self, id: NodeId, spec: ModelSpec) -> AgsimResult<NodeId> {
        let parent = self.node(id)?.parent;
        let new_id = self.insert_spec(parent, spec);
        match parent {
            Some(parent) => {
                let node = self.node_mut(parent)?;
                if let Some(slot) = node.children.iter_mut().find(|c| **c == id) {
                    *slot = new_id;
                }
                self.drop_subtree(id);
            }
            None => {
                self.drop_subtree(id);
                self.root = Some(new_id);
            }
        }
        Ok(new_id)
    }

    /// Iterate `id` and all of its descendants in pre-order.
    pub fn subtree(&self, id: NodeId) -> PreOrder<'_> {
        let stack = if self.contains(id) { vec![id] } else { vec![] };
        PreOrder { tree: self, stack }
    }

    /// Iterate the ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// Whether `id` is `root` or one of its descendants.
    pub fn is_within(&self, id: NodeId, root: NodeId) -> bool {
        id == root || self.ancestors(id).any(|a| a == root)
    }

    /// Descendants of `root` (never `root` itself) holding a `T`, in pre-order.
    ///
    /// Only direct children are considered unless `recursive` is set.
    pub fn find_by_type_within<T: Model>(&self, root: NodeId, recursive: bool) -> Vec<NodeId> {
        self.find_all_within(root, recursive, |node| node.is::<T>())
    }

    /// Descendants of `root` (never `root` itself) matching `predicate`, in pre-order.
    pub fn find_all_within<F>(&self, root: NodeId, recursive: bool, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&Node) -> bool,
    {
        let candidates: Vec<NodeId> = if recursive {
            self.subtree(root).skip(1).collect()
        } else {
            self.children(root).to_vec()
        };
        candidates
            .into_iter()
            .filter(|id| self.node(*id).map(&predicate).unwrap_or(false))
            .collect()
    }

    /// Nearest ancestor of `id` holding a `T`.
    pub fn find_ancestor_by_type<T: Model>(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).find(|a| self.is::<T>(*a))
    }

    /// Direct child of `parent` with the given name.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.name(*c) == name)
    }

    /// Resolve a model path relative to `from`.
    ///
    /// See [`ModelPath`] for the grammar.
    pub fn find_by_path(&self, from: NodeId, path: &str) -> AgsimResult<NodeId> {
        ModelPath::parse(path)?.resolve(self, from)
    }

    /// Resolve a model path and check the type of the model found.
    pub fn find_by_path_as<T: Model>(&self, from: NodeId, path: &str) -> AgsimResult<NodeId> {
        let id = self.find_by_path(from, path)?;
        if self.is::<T>(id) {
            Ok(id)
        } else {
            Err(AgsimError::WrongType {
                path: path.to_string(),
                expected: short_type_name::<T>().to_string(),
                found: self.node(id)?.type_name.to_string(),
            })
        }
    }

    /// Dotted absolute path of a node, e.g. `.Simulations.Base.Clock`.
    pub fn full_path(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self.ancestors(id).map(|a| self.name(a)).collect();
        names.reverse();
        names.push(self.name(id));
        let mut path = String::new();
        for name in names {
            path.push('.');
            path.push_str(name);
        }
        path
    }

    /// Read a property through a path such as `[Clock].Today`.
    pub fn get_variable(&self, from: NodeId, path: &str) -> AgsimResult<VariableValue> {
        let (model_path, property) = split_property(path)?;
        let id = self.find_by_path(from, model_path)?;
        self.model(id)?.get(property).ok_or_else(|| {
            AgsimError::Error(format!(
                "{} has no property '{}'",
                self.full_path(id),
                property
            ))
        })
    }

    /// Overwrite a property through a path such as `[Fertilise].Amount`.
    pub fn set_variable(
        &mut self,
        from: NodeId,
        path: &str,
        value: VariableValue,
    ) -> AgsimResult<()> {
        let (model_path, property) = split_property(path)?;
        let id = self.find_by_path(from, model_path)?;
        self.model_mut(id)?.set(property, value)
    }

    /// Position of every node of the subtree under `root` in pre-order.
    pub fn preorder_rank(&self, root: NodeId) -> HashMap<NodeId, usize> {
        self.subtree(root)
            .enumerate()
            .map(|(rank, id)| (id, rank))
            .collect()
    }

    /// A serializable view of the subtree at `id`.
    pub fn spec_view(&self, id: NodeId) -> SpecView<'_> {
        SpecView { tree: self, id }
    }

    /// Deep copy of the subtree at `id`, made by serializing and deserializing it.
    ///
    /// Runtime-only state (resolved links, loaded data) is not carried over.
    pub fn clone_spec(&self, id: NodeId) -> AgsimResult<ModelSpec> {
        let value = serde_json::to_value(self.spec_view(id))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Pre-order iterator over a subtree.
pub struct PreOrder<'a> {
    tree: &'a ModelTree,
    stack: Vec<NodeId>,
}

impl Iterator for PreOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Borrowed subtree serialized in the same shape as [`ModelSpec`].
pub struct SpecView<'a> {
    tree: &'a ModelTree,
    id: NodeId,
}

impl Serialize for SpecView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.tree.node(self.id).map_err(S::Error::custom)?;
        let model = node
            .model()
            .ok_or_else(|| S::Error::custom(format!("{} is busy", self.tree.full_path(self.id))))?;
        let children: Vec<SpecView<'_>> = node
            .children
            .iter()
            .map(|c| self.tree.spec_view(*c))
            .collect();

        let mut state = serializer.serialize_struct("ModelSpec", 4)?;
        state.serialize_field("Name", &node.name)?;
        state.serialize_field("IncludeInDocumentation", &node.include_in_documentation)?;
        state.serialize_field("Model", model)?;
        state.serialize_field("Children", &children)?;
        state.end()
    }
}
