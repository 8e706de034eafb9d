//! Discovery of the runnable simulations beneath a node.
//!
//! Every model under the start node that acts as a generator is planned once, in
//! pre-order, when the enumerator is created or reset. Simulations are then built one at
//! a time, as the enumerator is iterated or by the worker that runs the job. The planned
//! subtree is copied out of the shared, read-only tree, renamed, has replacements and
//! factor overrides applied, and is handed over as an unwired [`SimulationUnit`].

use crate::errors::{AgsimError, AgsimResult, SimulationError};
use crate::runner::{FailedJob, Job, JobSource, StopToken};
use crate::simulation::{apply_replacements, PlannedSimulation, Replacements, SimulationUnit};
use crate::storage::DataStore;
use crate::tree::{ModelTree, NodeId};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// The next item of a generator's plan.
#[derive(Debug, Clone)]
enum Pending {
    Planned(PlannedSimulation),
    /// A generator that could not be planned, reported under the generator's name.
    Failed(SimulationError),
}

impl Pending {
    fn name(&self) -> &str {
        match self {
            Pending::Planned(planned) => &planned.name,
            Pending::Failed(error) => &error.simulation,
        }
    }
}

#[derive(Debug)]
struct GeneratorEntry {
    generator: NodeId,
    pending: VecDeque<Pending>,
}

/// Lazily produces the simulations reachable from a start node.
#[derive(Debug)]
pub struct SimulationEnumerator {
    tree: Arc<ModelTree>,
    start: NodeId,
    store: Arc<dyn DataStore>,
    queue: VecDeque<GeneratorEntry>,
    produced: HashSet<String>,
}

impl SimulationEnumerator {
    pub fn new(tree: Arc<ModelTree>, start: NodeId, store: Arc<dyn DataStore>) -> Self {
        let mut enumerator = Self {
            tree,
            start,
            store,
            queue: VecDeque::new(),
            produced: HashSet::new(),
        };
        enumerator.reset();
        enumerator
    }

    /// Enumerate every simulation of a tree, starting from its root.
    pub fn from_tree(tree: ModelTree, store: Arc<dyn DataStore>) -> AgsimResult<Self> {
        let start = tree
            .root()
            .ok_or_else(|| AgsimError::Error("Cannot enumerate an empty tree".to_string()))?;
        Ok(Self::new(Arc::new(tree), start, store))
    }

    pub fn tree(&self) -> &Arc<ModelTree> {
        &self.tree
    }

    /// Re-derive the generator queue from the current tree.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.produced.clear();
        let tree = &self.tree;
        for id in tree.subtree(self.start) {
            let Ok(model) = tree.model(id) else {
                continue;
            };
            let Some(generator) = model.as_generator() else {
                continue;
            };
            if tree.find_ancestor_by_type::<Replacements>(id).is_some() {
                continue;
            }
            let pending = match generator.plan(tree, id) {
                Ok(plan) => plan.into_iter().map(Pending::Planned).collect(),
                Err(error) => {
                    warn!(generator = %tree.full_path(id), "{}", error);
                    VecDeque::from([Pending::Failed(SimulationError::new(
                        tree.name(id),
                        &error,
                    ))])
                }
            };
            self.queue.push_back(GeneratorEntry {
                generator: id,
                pending,
            });
        }
    }

    fn discard_exhausted(&mut self) {
        while self
            .queue
            .front()
            .map(|entry| entry.pending.is_empty())
            .unwrap_or(false)
        {
            self.queue.pop_front();
        }
    }

    /// Name of the next simulation, without building it.
    pub fn peek_name(&mut self) -> Option<&str> {
        self.discard_exhausted();
        self.queue
            .front()
            .and_then(|entry| entry.pending.front())
            .map(Pending::name)
    }

    /// Names of every simulation still to be produced, in order.
    pub fn simulation_names(&self) -> Vec<String> {
        self.queue
            .iter()
            .flat_map(|entry| entry.pending.iter())
            .map(|pending| pending.name().to_string())
            .collect()
    }

    /// Pop the next planned simulation, checking its name is unique.
    fn next_planned(&mut self) -> Option<Result<PlannedSimulation, SimulationError>> {
        self.discard_exhausted();
        let entry = self.queue.front_mut()?;
        let generator = entry.generator;
        let pending = entry.pending.pop_front()?;

        let planned = match pending {
            Pending::Planned(planned) => planned,
            Pending::Failed(error) => return Some(Err(error)),
        };
        if !self.produced.insert(planned.name.clone()) {
            return Some(Err(SimulationError::from_message(
                &planned.name,
                format!("Duplicate simulation name '{}'", planned.name),
            )));
        }
        debug!(
            simulation = %planned.name,
            generator = %self.tree.full_path(generator),
            "Planned"
        );
        Some(Ok(planned))
    }
}

fn replacements(tree: &ModelTree) -> Option<NodeId> {
    let root = tree.root()?;
    tree.find_by_type_within::<Replacements>(root, false)
        .first()
        .copied()
}

/// Build the tree of one planned simulation.
fn materialize(tree: &ModelTree, planned: &PlannedSimulation) -> AgsimResult<ModelTree> {
    let mut spec = tree.clone_spec(planned.source)?;
    spec.name = planned.name.clone();
    let mut simulation = ModelTree::from_spec(spec);
    let root = simulation
        .root()
        .ok_or_else(|| AgsimError::Error("Copied simulation is empty".to_string()))?;

    if let Some(replacements) = replacements(tree) {
        apply_replacements(tree, replacements, &mut simulation, root)?;
    }
    for change in &planned.overrides {
        let target = simulation.find_by_path(root, &change.path)?;
        simulation
            .model_mut(target)?
            .set(&change.property, change.value.clone())?;
    }
    Ok(simulation)
}

fn build_unit(
    tree: &ModelTree,
    planned: &PlannedSimulation,
    store: Arc<dyn DataStore>,
) -> AgsimResult<SimulationUnit> {
    debug!(simulation = %planned.name, "Materializing");
    let simulation = materialize(tree, planned)?;
    SimulationUnit::new(planned.name.clone(), simulation, store)
}

impl Iterator for SimulationEnumerator {
    type Item = Result<SimulationUnit, SimulationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let planned = match self.next_planned()? {
            Ok(planned) => planned,
            Err(error) => return Some(Err(error)),
        };
        let unit = build_unit(&self.tree, &planned, self.store.clone());
        Some(unit.map_err(|e| SimulationError::new(&planned.name, &e)))
    }
}

/// A planned simulation that is built by the worker that runs it.
#[derive(Debug)]
struct DeferredSimulation {
    tree: Arc<ModelTree>,
    planned: PlannedSimulation,
    store: Arc<dyn DataStore>,
    failure: Option<SimulationError>,
}

impl Job for DeferredSimulation {
    fn name(&self) -> &str {
        &self.planned.name
    }

    fn run(&mut self, stop: &StopToken) -> AgsimResult<()> {
        let mut unit = build_unit(&self.tree, &self.planned, self.store.clone())?;
        let result = Job::run(&mut unit, stop);
        self.failure = unit.error().cloned();
        result
    }

    fn failure(&self) -> Option<SimulationError> {
        self.failure.clone()
    }
}

impl JobSource for SimulationEnumerator {
    /// Only planning happens here; copying the tree is left to the job.
    fn next_job(&mut self) -> Option<Box<dyn Job>> {
        self.next_planned().map(|item| match item {
            Ok(planned) => Box::new(DeferredSimulation {
                tree: self.tree.clone(),
                planned,
                store: self.store.clone(),
                failure: None,
            }) as Box<dyn Job>,
            Err(error) => Box::new(FailedJob::new(error)) as Box<dyn Job>,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::model::{Folder, Simulations};
    use crate::simulation::{Experiment, Factor, Factors, Simulation};
    use crate::storage::MemoryStore;
    use crate::test_models::clock;
    use crate::value::VariableValue;
    use chrono::NaiveDate;

    fn factorial_tree() -> ModelTree {
        let mut tree = ModelTree::new();
        let root = tree.add_root("Simulations", Simulations::default()).unwrap();
        let exp = tree.add_child(root, "Exp", Experiment::default()).unwrap();
        let factors = tree.add_child(exp, "Factors", Factors::default()).unwrap();
        tree.add_child(
            factors,
            "End",
            Factor::new("[Clock].EndDate = 2000-01-02, 2000-01-03"),
        )
        .unwrap();
        tree.add_child(factors, "Cv", Factor::new("[Clock].Label = x, y, z"))
            .unwrap();
        let base = tree.add_child(exp, "Base", Simulation::default()).unwrap();
        tree.add_child(base, "Clock", clock(1)).unwrap();
        tree
    }

    fn enumerator(tree: ModelTree) -> SimulationEnumerator {
        SimulationEnumerator::from_tree(tree, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn factorial_yields_six_unique_names_and_peek_does_not_consume() {
        let mut enumerator = enumerator(factorial_tree());
        let names = enumerator.simulation_names();
        assert_eq!(names.len(), 6);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 6);
        assert_eq!(names[0], "ExpEnd2000-01-02Cvx");

        assert_eq!(enumerator.peek_name(), Some("ExpEnd2000-01-02Cvx"));
        assert_eq!(enumerator.peek_name(), Some("ExpEnd2000-01-02Cvx"));
        assert_eq!(enumerator.simulation_names(), names);
    }

    #[test]
    fn overrides_are_applied_to_each_copy() {
        let mut tree = factorial_tree();
        // Drop the label factor, which Clock cannot accept.
        let root = tree.root().unwrap();
        let factors = tree.find_by_path(root, ".Simulations.Exp.Factors").unwrap();
        let cv = tree.find_child(factors, "Cv").unwrap();
        tree.remove_child(factors, cv).unwrap();

        let units: Vec<_> = enumerator(tree).map(|u| u.unwrap()).collect();
        assert_eq!(units.len(), 2);
        let ends: Vec<_> = units
            .iter()
            .map(|unit| {
                let tree = unit.tree().unwrap();
                tree.get_variable(unit.root(), "[Clock].EndDate").unwrap()
            })
            .collect();
        assert_eq!(
            ends,
            vec![
                VariableValue::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()),
                VariableValue::Date(NaiveDate::from_ymd_opt(2000, 1, 3).unwrap()),
            ]
        );
        assert_eq!(units[1].name(), "ExpEnd2000-01-03");
        assert_eq!(units[1].tree().unwrap().name(units[1].root()), "ExpEnd2000-01-03");
    }

    #[test]
    fn bad_override_is_reported_against_the_simulation() {
        let results: Vec<_> = enumerator(factorial_tree()).collect();
        assert_eq!(results.len(), 6);
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.simulation, "ExpEnd2000-01-02Cvx");
        assert!(err.message.contains("Label"));
    }

    #[test]
    fn jobs_are_built_when_run() {
        let mut enumerator = enumerator(factorial_tree());
        let mut job = enumerator.next_job().unwrap();
        assert_eq!(job.name(), "ExpEnd2000-01-02Cvx");
        assert!(job.failure().is_none());

        // The bad override only surfaces once the worker builds the simulation.
        let err = job.run(&StopToken::new()).unwrap_err();
        assert!(err.to_string().contains("Label"));
        assert_eq!(enumerator.simulation_names().len(), 5);
    }

    #[test]
    fn duplicate_names_are_errors_and_reset_restarts() {
        let mut tree = ModelTree::new();
        let root = tree.add_root("Simulations", Simulations::default()).unwrap();
        for folder in ["F1", "F2"] {
            let f = tree.add_child(root, folder, Folder::default()).unwrap();
            let sim = tree.add_child(f, "Sim", Simulation::default()).unwrap();
            tree.add_child(sim, "Clock", clock(1)).unwrap();
        }

        let mut enumerator = enumerator(tree);
        let first: Vec<_> = enumerator.by_ref().collect();
        assert_eq!(first.len(), 2);
        assert!(first[0].is_ok());
        assert!(first[1].as_ref().unwrap_err().message.contains("Duplicate"));
        assert!(enumerator.next().is_none());
        assert_eq!(enumerator.peek_name(), None);

        enumerator.reset();
        assert_eq!(enumerator.simulation_names(), vec!["Sim", "Sim"]);
    }

    #[test]
    fn generated_units_run_independently() {
        let mut tree = ModelTree::new();
        let root = tree.add_root("Simulations", Simulations::default()).unwrap();
        for name in ["A", "B"] {
            let sim = tree.add_child(root, name, Simulation::default()).unwrap();
            tree.add_child(sim, "Clock", clock(3)).unwrap();
        }
        let mut generated = enumerator(tree);
        let mut a = generated.next().unwrap().unwrap();
        let b = generated.next().unwrap().unwrap();

        // Mutating one copy leaves the other untouched.
        let a_root = a.root();
        let clock_id = a.tree().unwrap().find_by_path(a_root, "[Clock]").unwrap();
        a.tree_mut()
            .unwrap()
            .get_mut::<Clock>(clock_id)
            .unwrap()
            .end_date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        a.run(&StopToken::new()).unwrap();
        assert_eq!(a.days_run(), 1);

        let b_clock = b.tree().unwrap().find_by_path(b.root(), "[Clock]").unwrap();
        assert_eq!(
            b.tree().unwrap().get::<Clock>(b_clock).unwrap().number_of_days(),
            3
        );
    }
}
