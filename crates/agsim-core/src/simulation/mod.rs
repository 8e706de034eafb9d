//! Runnable simulations and the models that generate them.
//!
//! A generator describes the simulations it will produce as a list of
//! [`PlannedSimulation`]s: the subtree to copy, the name to give the copy and the property
//! overrides to apply to it. Planning never touches the tree, so simulation names can be
//! listed without building anything.

mod experiment;
mod replacements;
mod unit;

use crate::errors::AgsimResult;
use crate::model::Model;
use crate::tree::{ModelTree, NodeId};
use crate::value::VariableValue;
use serde::{Deserialize, Serialize};

pub use experiment::{Experiment, Factor, FactorSpecification, Factors};
pub use replacements::{apply_replacements, Replacements};
pub use unit::{SimulationReport, SimulationState, SimulationUnit};

/// A property value to apply to a generated simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Model path, resolved from the root of the generated simulation.
    pub path: String,
    pub property: String,
    pub value: VariableValue,
}

/// One simulation a generator will produce.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSimulation {
    pub name: String,
    /// The subtree copied to make the simulation.
    pub source: NodeId,
    pub overrides: Vec<Override>,
}

pub type GeneratorPlan = Vec<PlannedSimulation>;

/// A model that produces runnable simulations.
pub trait SimulationGenerator {
    /// List the simulations this generator produces, in order.
    fn plan(&self, tree: &ModelTree, me: NodeId) -> AgsimResult<GeneratorPlan>;
}

/// Root of one runnable simulation.
///
/// A simulation directly beneath an [`Experiment`] is the experiment's base simulation
/// and is not run on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Simulation {}

#[typetag::serde]
impl Model for Simulation {
    fn as_generator(&self) -> Option<&dyn SimulationGenerator> {
        Some(self)
    }
}

impl SimulationGenerator for Simulation {
    fn plan(&self, tree: &ModelTree, me: NodeId) -> AgsimResult<GeneratorPlan> {
        if tree.parent(me).map(|p| tree.is::<Experiment>(p)) == Some(true) {
            return Ok(Vec::new());
        }
        Ok(vec![PlannedSimulation {
            name: tree.name(me).to_string(),
            source: me,
            overrides: Vec::new(),
        }])
    }
}
