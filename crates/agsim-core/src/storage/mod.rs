//! Append-only output of simulations.
//!
//! A [`DataStore`] receives rows from every simulation of a run, possibly from several
//! worker threads at once, so implementations serialize appends internally.

mod csv_store;
mod memory;

use crate::errors::AgsimResult;
use crate::value::VariableValue;
use indexmap::IndexMap;
use std::fmt::Debug;
use std::sync::Arc;

pub use csv_store::CsvStore;
pub use memory::{MemoryStore, StoredRow};

/// Named values of one output row, in column order.
pub type Row = IndexMap<String, VariableValue>;

/// Column added to every stored row naming the simulation that wrote it.
pub const SIMULATION_COLUMN: &str = "SimulationName";

pub trait DataStore: Send + Sync + Debug {
    /// Append a row to `table` on behalf of `simulation`.
    fn write_row(&self, simulation: &str, table: &str, row: Row) -> AgsimResult<()>;

    /// Block until every row written so far has been persisted.
    fn flush(&self) -> AgsimResult<()> {
        Ok(())
    }
}

/// The storage handle given to one simulation.
#[derive(Debug, Clone)]
pub struct StorageWriter {
    simulation: String,
    store: Arc<dyn DataStore>,
}

impl StorageWriter {
    pub fn new(simulation: impl Into<String>, store: Arc<dyn DataStore>) -> Self {
        Self {
            simulation: simulation.into(),
            store,
        }
    }

    pub fn simulation(&self) -> &str {
        &self.simulation
    }

    pub fn write_row(&self, table: &str, row: Row) -> AgsimResult<()> {
        self.store.write_row(&self.simulation, table, row)
    }

    pub fn flush(&self) -> AgsimResult<()> {
        self.store.flush()
    }
}
