//! Core machinery for composing and running agricultural simulations.
//!
//! A simulation is described as a tree of typed models ([`tree::ModelTree`]).
//! Models declare the other models they need ([`links`]) and the lifecycle events they
//! respond to ([`events`]). A [`simulation::SimulationUnit`] wires one tree together and
//! drives it a day at a time, the [`enumerator::SimulationEnumerator`] discovers the units
//! reachable from a tree (expanding factorial experiments) and the [`runner::JobRunner`]
//! executes them serially or on a worker pool.

pub mod aggregation;
pub mod clock;
pub mod config;
pub mod enumerator;
pub mod errors;
pub mod events;
pub mod file;
pub mod links;
pub mod model;
pub mod runner;
pub mod simulation;
pub mod storage;
pub mod summary;
pub mod tree;
pub mod value;

#[cfg(test)]
mod test_models;

pub use errors::{AgsimError, AgsimResult, SimulationError};
pub use model::{Model, ModelSpec};
pub use tree::{ModelTree, NodeId};
pub use value::VariableValue;
