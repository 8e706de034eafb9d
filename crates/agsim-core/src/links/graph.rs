use super::Links;
use crate::errors::AgsimResult;
use crate::tree::{ModelTree, NodeId};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// A declared link between two models.
#[derive(Debug, Clone)]
pub struct LinkEdge {
    pub field: &'static str,
}

/// Directed graph of resolved links, from the declaring model to its target.
///
/// Only used for inspection; the resolver itself never builds it.
#[derive(Debug)]
pub struct LinkGraph {
    graph: DiGraph<String, LinkEdge>,
}

impl LinkGraph {
    pub fn graph(&self) -> &DiGraph<String, LinkEdge> {
        &self.graph
    }

    pub fn as_dot(&self) -> String {
        let dot = Dot::with_attr_getters(
            &self.graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, edge| format!("label = {:?}", edge.weight().field),
            &|_, (_, path)| format!("label = {:?}", path),
        );
        format!("{:?}", dot)
    }
}

impl Links {
    /// Build a graph of the current bindings under `root`.
    pub fn graph(tree: &mut ModelTree, root: NodeId) -> AgsimResult<LinkGraph> {
        let bindings = Self::bindings(tree, root)?;
        let mut graph = DiGraph::new();
        let mut indices: HashMap<NodeId, NodeIndex> = HashMap::new();
        let mut index_of = |graph: &mut DiGraph<String, LinkEdge>, id: NodeId| {
            *indices
                .entry(id)
                .or_insert_with(|| graph.add_node(tree.full_path(id)))
        };

        for binding in bindings {
            if let Some(target) = binding.target {
                let from = index_of(&mut graph, binding.model);
                let to = index_of(&mut graph, target);
                graph.add_edge(
                    from,
                    to,
                    LinkEdge {
                        field: binding.field,
                    },
                );
            }
        }
        Ok(LinkGraph { graph })
    }
}
