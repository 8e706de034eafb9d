use crate::clock::Clock;
use crate::errors::{AgsimError, AgsimResult, SimulationError};
use crate::events::{EventBus, Services, DAILY_EVENTS, END_OF_SIMULATION, START_OF_SIMULATION};
use crate::links::Links;
use crate::runner::StopToken;
use crate::storage::{DataStore, StorageWriter};
use crate::summary::{Severity, Summary, SummaryWriter};
use crate::tree::{ModelTree, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span};

/// Lifecycle of a [`SimulationUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationState {
    /// Tree assembled, nothing wired.
    Constructed,
    /// Links are being resolved.
    Resolving,
    /// Links resolved, events connected and the clock at its start date.
    Ready,
    /// Days are being simulated.
    Running,
    Completed,
    Failed,
    /// Stopped at a day boundary on request.
    Cancelled,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What remains of a simulation once its tree has been released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub name: String,
    pub state: SimulationState,
    pub days_run: usize,
    pub error: Option<SimulationError>,
}

/// One fully wired, independently runnable simulation.
///
/// The unit exclusively owns its model tree. A day is simulated by publishing the
/// [`DAILY_EVENTS`] in order and then advancing the clock; `StartOfSimulation` is
/// published before the first day and `EndOfSimulation` once the clock passes its end
/// date.
#[derive(Debug)]
pub struct SimulationUnit {
    name: String,
    tree: Option<ModelTree>,
    root: NodeId,
    clock: Option<NodeId>,
    bus: EventBus,
    services: Services,
    state: SimulationState,
    error: Option<SimulationError>,
    days_run: usize,
}

impl SimulationUnit {
    pub fn new(
        name: impl Into<String>,
        tree: ModelTree,
        store: Arc<dyn DataStore>,
    ) -> AgsimResult<Self> {
        let name = name.into();
        let root = tree.root().ok_or_else(|| AgsimError::Structural {
            source_name: name.clone(),
            message: "simulation tree is empty".to_string(),
        })?;
        Ok(Self {
            services: Services {
                summary: SummaryWriter::new(name.clone(), store.clone(), Severity::Information),
                storage: StorageWriter::new(name.clone(), store),
                today: None,
            },
            name,
            tree: Some(tree),
            root,
            clock: None,
            bus: EventBus::new(),
            state: SimulationState::Constructed,
            error: None,
            days_run: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn error(&self) -> Option<&SimulationError> {
        self.error.as_ref()
    }

    pub fn days_run(&self) -> usize {
        self.days_run
    }

    /// The simulation's models, until the unit is released.
    pub fn tree(&self) -> Option<&ModelTree> {
        self.tree.as_ref()
    }

    pub fn tree_mut(&mut self) -> Option<&mut ModelTree> {
        self.tree.as_mut()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn tree_or_err<'a>(
        tree: &'a mut Option<ModelTree>,
        name: &str,
    ) -> AgsimResult<&'a mut ModelTree> {
        tree.as_mut().ok_or_else(|| {
            AgsimError::Error(format!("Simulation '{}' has already been released", name))
        })
    }

    /// Resolve links, connect events and reset the clock.
    pub fn prepare(&mut self) -> AgsimResult<()> {
        if self.state != SimulationState::Constructed {
            return Ok(());
        }
        self.state = SimulationState::Resolving;
        let result = self.try_prepare();
        self.record(result)?;
        self.state = SimulationState::Ready;
        Ok(())
    }

    fn try_prepare(&mut self) -> AgsimResult<()> {
        let tree = Self::tree_or_err(&mut self.tree, &self.name)?;
        let root = self.root;

        if let Some(summary) = tree.find_by_type_within::<Summary>(root, true).first() {
            let verbosity = tree.get::<Summary>(*summary)?.verbosity;
            self.services.summary.set_verbosity(verbosity);
        }

        let clock = tree
            .find_by_type_within::<Clock>(root, true)
            .first()
            .copied()
            .ok_or_else(|| AgsimError::MissingDependency {
                model: tree.full_path(root),
                field: "Clock".to_string(),
                target: "type Clock".to_string(),
            })?;

        Links::resolve(tree, root)?;
        self.bus = EventBus::connect(tree, root)?;
        tree.get_mut::<Clock>(clock)?.reset()?;
        self.clock = Some(clock);
        debug!(simulation = %self.name, "Prepared");
        Ok(())
    }

    /// Simulate one day.
    ///
    /// Prepares the unit first if needed. Returns `false` once the clock is exhausted, at
    /// which point the unit is completed.
    pub fn step(&mut self) -> AgsimResult<bool> {
        match self.state {
            SimulationState::Constructed => self.prepare()?,
            SimulationState::Resolving => {
                return Err(AgsimError::Error(format!(
                    "Simulation '{}' is still resolving",
                    self.name
                )))
            }
            SimulationState::Ready | SimulationState::Running => {}
            SimulationState::Completed
            | SimulationState::Failed
            | SimulationState::Cancelled => return Ok(false),
        }
        let result = self.try_step();
        self.record(result)
    }

    fn try_step(&mut self) -> AgsimResult<bool> {
        let tree = Self::tree_or_err(&mut self.tree, &self.name)?;
        let clock_id = self.clock.ok_or_else(|| {
            AgsimError::Error(format!("Simulation '{}' has no clock", self.name))
        })?;

        if self.state == SimulationState::Ready {
            self.state = SimulationState::Running;
            self.services.today = tree.get::<Clock>(clock_id)?.today();
            self.bus
                .publish(tree, self.root, START_OF_SIMULATION, None, &self.services)?;
        }

        let clock = tree.get::<Clock>(clock_id)?;
        if clock.is_finished() {
            self.bus
                .publish(tree, self.root, END_OF_SIMULATION, None, &self.services)?;
            self.state = SimulationState::Completed;
            self.services.summary.write(
                self.services.today,
                &tree.full_path(self.root),
                &format!("Simulation completed after {} days", self.days_run),
                Severity::Information,
            )?;
            self.services.storage.flush()?;
            return Ok(false);
        }

        self.services.today = clock.today();
        for event in DAILY_EVENTS {
            self.bus
                .publish(tree, self.root, event, None, &self.services)?;
        }
        tree.get_mut::<Clock>(clock_id)?.advance();
        self.days_run += 1;
        Ok(true)
    }

    /// Capture a failure: the unit stops advancing and keeps the error.
    fn record<T>(&mut self, result: AgsimResult<T>) -> AgsimResult<T> {
        if let Err(error) = &result {
            self.state = SimulationState::Failed;
            let captured = SimulationError::new(&self.name, error);
            let model = captured.model.clone().unwrap_or_else(|| self.name.clone());
            if let Err(e) =
                self.services
                    .summary
                    .write(self.services.today, &model, &captured.message, Severity::Error)
            {
                debug!("Could not record failure in summary: {}", e);
            }
            self.error = Some(captured);
        }
        result
    }

    /// Run until the clock is exhausted, a model fails or `stop` is requested.
    ///
    /// The stop request is only checked between days.
    pub fn run(&mut self, stop: &StopToken) -> AgsimResult<()> {
        let span = info_span!("simulation", name = %self.name);
        let _entered = span.enter();

        loop {
            if stop.is_stopped() {
                return Err(self.cancel());
            }
            if !self.step()? {
                break;
            }
        }
        match self.state {
            SimulationState::Completed => Ok(()),
            state => Err(AgsimError::Error(format!(
                "Simulation '{}' stopped in state {}",
                self.name, state
            ))),
        }
    }

    fn cancel(&mut self) -> AgsimError {
        self.state = SimulationState::Cancelled;
        let error = AgsimError::Cancelled(self.name.clone());
        self.error = Some(SimulationError::new(&self.name, &error));
        if let Err(e) = self.services.storage.flush() {
            debug!("Flushing cancelled simulation: {}", e);
        }
        error
    }

    /// Drop the model tree, keeping only the outcome.
    pub fn release(&mut self) {
        self.tree = None;
        self.bus = EventBus::new();
    }

    pub fn into_report(self) -> SimulationReport {
        SimulationReport {
            name: self.name,
            state: self.state,
            days_run: self.days_run,
            error: self.error,
        }
    }
}
