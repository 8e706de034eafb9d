use crate::errors::AgsimResult;
use crate::model::Model;
use crate::tree::{ModelTree, NodeId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::debug;

/// Holds models that replace same-named models of the same type in every simulation.
///
/// Only a `Replacements` node directly beneath the root of a file is honoured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Replacements {}

#[typetag::serde]
impl Model for Replacements {}

/// Copy every child of `replacements` (in `source`) over the matching models of `target`.
///
/// Returns the number of models replaced.
pub fn apply_replacements(
    source: &ModelTree,
    replacements: NodeId,
    target: &mut ModelTree,
    root: NodeId,
) -> AgsimResult<usize> {
    let mut replaced = 0;
    for &replacement in source.children(replacements) {
        let name = source.name(replacement);
        let kind = source.model(replacement)?.as_any().type_id();
        let matches: Vec<NodeId> = target
            .subtree(root)
            .filter(|id| {
                target.name(*id) == name
                    && target
                        .model(*id)
                        .map(|m| Any::type_id(m.as_any()) == kind)
                        .unwrap_or(false)
            })
            .collect();
        // Replacing a match also replaces any match nested inside it.
        let outermost: Vec<NodeId> = matches
            .iter()
            .copied()
            .filter(|id| !target.ancestors(*id).any(|a| matches.contains(&a)))
            .collect();
        for id in outermost {
            debug!(model = %target.full_path(id), "Replacing model");
            target.replace_subtree(id, source.clone_spec(replacement)?)?;
            replaced += 1;
        }
    }
    Ok(replaced)
}
