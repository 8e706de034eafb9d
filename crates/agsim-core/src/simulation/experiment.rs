use super::{GeneratorPlan, Override, PlannedSimulation, Simulation, SimulationGenerator};
use crate::errors::{AgsimError, AgsimResult};
use crate::links::{LinkDeclaration, Links};
use crate::model::Model;
use crate::tree::{split_property, ModelTree, NodeId};
use crate::value::VariableValue;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A factorial experiment.
///
/// Expects a [`Factors`] child holding one [`Factor`] per treatment and a base
/// [`Simulation`] child. Produces one simulation per combination of factor levels, named
/// by appending each factor's name and level to the experiment's name. The last factor
/// varies fastest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Experiment {}

/// Container of the factors of an [`Experiment`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Factors {}

/// One treatment of an experiment, e.g. `[Fertilise].Amount = 0, 50, 100`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Factor {
    pub specification: String,
}

/// A parsed factor specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorSpecification {
    pub path: String,
    pub property: String,
    pub levels: Vec<String>,
}

impl Factor {
    pub fn new(specification: impl Into<String>) -> Self {
        Self {
            specification: specification.into(),
        }
    }

    pub fn parse(&self) -> AgsimResult<FactorSpecification> {
        let invalid = |message: &str| AgsimError::Structural {
            source_name: self.specification.clone(),
            message: message.to_string(),
        };
        let (target, levels) = self
            .specification
            .split_once('=')
            .ok_or_else(|| invalid("expected '<path>.<property> = <level>, ...'"))?;
        let (path, property) = split_property(target.trim())?;
        let levels: Vec<String> = levels
            .split(',')
            .map(|level| level.trim().to_string())
            .filter(|level| !level.is_empty())
            .collect();
        if levels.is_empty() {
            return Err(invalid("factor has no levels"));
        }
        Ok(FactorSpecification {
            path: path.to_string(),
            property: property.to_string(),
            levels,
        })
    }
}

#[typetag::serde]
impl Model for Experiment {
    fn as_generator(&self) -> Option<&dyn SimulationGenerator> {
        Some(self)
    }
}

#[typetag::serde]
impl Model for Factors {}

#[typetag::serde]
impl Model for Factor {
    fn get(&self, property: &str) -> Option<VariableValue> {
        match property {
            "Specification" => Some(VariableValue::Text(self.specification.clone())),
            _ => None,
        }
    }
}

impl Experiment {
    fn required_child(
        tree: &ModelTree,
        me: NodeId,
        declaration: LinkDeclaration,
    ) -> AgsimResult<NodeId> {
        Links::resolve_declaration(tree, me, &declaration)?.ok_or_else(|| {
            AgsimError::MissingDependency {
                model: tree.full_path(me),
                field: declaration.field.to_string(),
                target: declaration.target.to_string(),
            }
        })
    }
}

impl SimulationGenerator for Experiment {
    fn plan(&self, tree: &ModelTree, me: NodeId) -> AgsimResult<GeneratorPlan> {
        let factors = Self::required_child(tree, me, LinkDeclaration::child::<Factors>("Factors"))?;
        let base = Self::required_child(tree, me, LinkDeclaration::child::<Simulation>("Base"))?;

        let mut treatments = Vec::new();
        for id in tree.find_by_type_within::<Factor>(factors, false) {
            let specification = tree.get::<Factor>(id)?.parse()?;
            treatments.push((tree.name(id), specification));
        }
        if treatments.is_empty() {
            warn!(experiment = %tree.full_path(me), "Experiment has no factors");
            return Ok(Vec::new());
        }

        let mut plan = Vec::new();
        let mut indices = vec![0usize; treatments.len()];
        loop {
            let mut name = tree.name(me).to_string();
            let mut overrides = Vec::with_capacity(treatments.len());
            for ((factor, specification), &level) in treatments.iter().zip(&indices) {
                let level = &specification.levels[level];
                name.push_str(factor);
                name.push_str(level);
                overrides.push(Override {
                    path: specification.path.clone(),
                    property: specification.property.clone(),
                    value: VariableValue::parse(level),
                });
            }
            plan.push(PlannedSimulation {
                name,
                source: base,
                overrides,
            });

            // Odometer increment, last factor fastest.
            let mut position = treatments.len();
            loop {
                if position == 0 {
                    return Ok(plan);
                }
                position -= 1;
                indices[position] += 1;
                if indices[position] < treatments[position].1.levels.len() {
                    break;
                }
                indices[position] = 0;
            }
        }
    }
}
