use super::{ModelTree, NodeId};
use crate::errors::{AgsimError, AgsimResult};

/// Where resolution of a [`ModelPath`] begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathAnchor {
    /// `.Simulations.Base.Clock`: the first segment names the top of the tree.
    Absolute,
    /// `[Clock].Sub`: the first segment is a model name found in the nearest enclosing
    /// scope of the querying model.
    Scoped,
    /// `Field.Clock`: the first segment is a child of the querying model or, failing
    /// that, of one of its ancestors.
    Relative,
}

/// A parsed model locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPath {
    original: String,
    pub anchor: PathAnchor,
    pub segments: Vec<String>,
}

impl ModelPath {
    pub fn parse(path: &str) -> AgsimResult<Self> {
        let trimmed = path.trim();
        let malformed = |reason: &str| AgsimError::NodeNotFound {
            path: path.to_string(),
            segment: reason.to_string(),
        };

        let (anchor, first, rest) = if let Some(rest) = trimmed.strip_prefix('.') {
            let (first, rest) = rest.split_once('.').unwrap_or((rest, ""));
            (PathAnchor::Absolute, first, rest)
        } else if let Some(rest) = trimmed.strip_prefix('[') {
            let (first, rest) = rest
                .split_once(']')
                .ok_or_else(|| malformed(trimmed))?;
            let rest = rest.strip_prefix('.').unwrap_or(rest);
            (PathAnchor::Scoped, first, rest)
        } else {
            let (first, rest) = trimmed.split_once('.').unwrap_or((trimmed, ""));
            (PathAnchor::Relative, first, rest)
        };

        // A scope may itself be dotted: `[Stock.Ewes]` scopes on `Stock`.
        let (first, inner) = first.split_once('.').unwrap_or((first, ""));
        if first.trim().is_empty() {
            return Err(malformed(trimmed));
        }
        let mut segments = vec![first.trim().to_string()];
        for segment in inner.split('.').chain(rest.split('.')).filter(|s| !s.is_empty()) {
            segments.push(segment.trim().to_string());
        }

        Ok(Self {
            original: path.to_string(),
            anchor,
            segments,
        })
    }

    fn not_found(&self, segment: &str) -> AgsimError {
        AgsimError::NodeNotFound {
            path: self.original.clone(),
            segment: segment.to_string(),
        }
    }

    /// Resolve this path from the model at `from`.
    pub fn resolve(&self, tree: &ModelTree, from: NodeId) -> AgsimResult<NodeId> {
        tree.node(from)?;
        let first = &self.segments[0];
        let start = match self.anchor {
            PathAnchor::Absolute => {
                let top = tree.ancestors(from).last().unwrap_or(from);
                if tree.name(top) == first.as_str() {
                    Some(top)
                } else {
                    None
                }
            }
            PathAnchor::Scoped => std::iter::once(from)
                .chain(tree.ancestors(from))
                .find_map(|scope| tree.subtree(scope).find(|n| tree.name(*n) == first.as_str())),
            PathAnchor::Relative => std::iter::once(from)
                .chain(tree.ancestors(from))
                .find_map(|scope| tree.find_child(scope, first)),
        };
        let mut current = start.ok_or_else(|| self.not_found(first))?;

        for segment in &self.segments[1..] {
            current = tree
                .find_child(current, segment)
                .ok_or_else(|| self.not_found(segment))?;
        }
        Ok(current)
    }
}

/// Split `model_path.Property` into the model path and the property name.
///
/// The property is the last dot-separated segment outside of any `[...]` scope.
pub fn split_property(path: &str) -> AgsimResult<(&str, &str)> {
    let trimmed = path.trim();
    let scope_end = trimmed.rfind(']').map(|i| i + 1).unwrap_or(0);
    match trimmed[scope_end..].rfind('.') {
        Some(dot) => {
            let dot = scope_end + dot;
            let (model, property) = (&trimmed[..dot], &trimmed[dot + 1..]);
            if model.is_empty() || property.is_empty() {
                Err(AgsimError::NodeNotFound {
                    path: path.to_string(),
                    segment: trimmed.to_string(),
                })
            } else {
                Ok((model, property))
            }
        }
        None => Err(AgsimError::Error(format!(
            "Variable path '{}' does not name a property",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Folder, Simulations, Zone};

    fn tree() -> (ModelTree, NodeId, NodeId) {
        let mut tree = ModelTree::new();
        let root = tree.add_root("Simulations", Simulations::default()).unwrap();
        let sim = tree.add_child(root, "Sim", Folder::default()).unwrap();
        let field = tree.add_child(sim, "Field", Zone::default()).unwrap();
        let soil = tree.add_child(field, "Soil", Folder::default()).unwrap();
        tree.add_child(soil, "Water", Folder::default()).unwrap();
        tree.add_child(sim, "Manager", Folder::default()).unwrap();
        (tree, root, soil)
    }

    #[test]
    fn parses_anchors() {
        let p = ModelPath::parse(".Simulations.Sim").unwrap();
        assert_eq!(p.anchor, PathAnchor::Absolute);
        assert_eq!(p.segments, vec!["Simulations", "Sim"]);

        let p = ModelPath::parse("[Soil].Water").unwrap();
        assert_eq!(p.anchor, PathAnchor::Scoped);
        assert_eq!(p.segments, vec!["Soil", "Water"]);

        let p = ModelPath::parse("[Field.Soil].Water").unwrap();
        assert_eq!(p.anchor, PathAnchor::Scoped);
        assert_eq!(p.segments, vec!["Field", "Soil", "Water"]);

        let p = ModelPath::parse("Field.Soil").unwrap();
        assert_eq!(p.anchor, PathAnchor::Relative);

        assert!(ModelPath::parse("").is_err());
        assert!(ModelPath::parse("[Soil").is_err());
    }

    #[test]
    fn resolves_absolute_scoped_and_relative() {
        let (tree, root, soil) = tree();
        let water = tree
            .find_by_path(root, ".Simulations.Sim.Field.Soil.Water")
            .unwrap();
        assert_eq!(tree.find_by_path(water, "[Soil].Water").unwrap(), water);
        assert_eq!(tree.find_by_path(root, "[Water]").unwrap(), water);
        assert_eq!(tree.find_by_path(root, "[Field.Soil].Water").unwrap(), water);
        assert_eq!(tree.find_by_path(root, "[Field.Soil.Water]").unwrap(), water);

        // Relative lookup walks outward through ancestors' children.
        let manager = tree.find_by_path(soil, "Manager").unwrap();
        assert_eq!(tree.full_path(manager), ".Simulations.Sim.Manager");
        assert_eq!(tree.find_by_path(soil, "Water").unwrap(), water);
    }

    #[test]
    fn missing_segment_is_reported() {
        let (tree, root, _) = tree();
        match tree.find_by_path(root, ".Simulations.Sim.Paddock.Soil") {
            Err(AgsimError::NodeNotFound { segment, .. }) => assert_eq!(segment, "Paddock"),
            other => panic!("unexpected {:?}", other),
        }
        match tree.find_by_path(root, ".Other.Sim") {
            Err(AgsimError::NodeNotFound { segment, .. }) => assert_eq!(segment, "Other"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrong_type_is_distinct_from_not_found() {
        let (tree, root, _) = tree();
        let err = tree.find_by_path_as::<Zone>(root, "[Soil]").unwrap_err();
        assert!(matches!(err, AgsimError::WrongType { .. }));
        assert!(tree.find_by_path_as::<Zone>(root, "[Field]").is_ok());
    }

    #[test]
    fn splits_properties() {
        assert_eq!(split_property("[Clock].Today").unwrap(), ("[Clock]", "Today"));
        assert_eq!(
            split_property(".Simulations.Sim.Clock.Today").unwrap(),
            (".Simulations.Sim.Clock", "Today")
        );
        assert_eq!(
            split_property("[Field.Soil].Water").unwrap(),
            ("[Field.Soil]", "Water")
        );
        assert!(split_property("[Clock]").is_err());
    }
}
