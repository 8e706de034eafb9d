//! Named lifecycle events and their dispatch.
//!
//! Subscriptions are collected once, when a simulation is wired, into an explicit map
//! from event name to subscribers. Subscribers of an event are always kept in tree
//! pre-order, which is the order they are called in.
//!
//! The first handler to return an error aborts the remainder of the publish cycle; the
//! error is returned to the caller, which fails the simulation.

use crate::errors::{AgsimError, AgsimResult};
use crate::links::Link;
use crate::model::Model;
use crate::storage::{Row, StorageWriter};
use crate::summary::{Severity, SummaryWriter};
use crate::tree::{ModelTree, NodeId};
use crate::value::VariableValue;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::trace;

pub const START_OF_SIMULATION: &str = "StartOfSimulation";
pub const START_OF_DAY: &str = "StartOfDay";
pub const DO_WEATHER: &str = "DoWeather";
pub const DO_MANAGEMENT: &str = "DoManagement";
pub const DO_SOIL: &str = "DoSoil";
pub const DO_PLANT_GROWTH: &str = "DoPlantGrowth";
pub const DO_STOCK: &str = "DoStock";
pub const DO_REPORT: &str = "DoReport";
pub const END_OF_DAY: &str = "EndOfDay";
pub const END_OF_SIMULATION: &str = "EndOfSimulation";

/// Events published every simulated day, in order.
pub const DAILY_EVENTS: [&str; 8] = [
    START_OF_DAY,
    DO_WEATHER,
    DO_MANAGEMENT,
    DO_SOIL,
    DO_PLANT_GROWTH,
    DO_STOCK,
    DO_REPORT,
    END_OF_DAY,
];

/// Framework services available to every handler of a simulation.
#[derive(Debug, Clone)]
pub struct Services {
    pub summary: SummaryWriter,
    pub storage: StorageWriter,
    /// The simulated date of the current publish cycle.
    pub today: Option<NaiveDate>,
}

/// Everything a handler can reach while responding to an event.
///
/// The handling model itself is checked out of the tree for the duration of the call,
/// so it is reached through `&mut self` rather than through the context.
pub struct EventContext<'a> {
    tree: &'a mut ModelTree,
    me: NodeId,
    event: &'a str,
    args: Option<&'a VariableValue>,
    services: &'a Services,
}

impl<'a> EventContext<'a> {
    pub fn new(
        tree: &'a mut ModelTree,
        me: NodeId,
        event: &'a str,
        args: Option<&'a VariableValue>,
        services: &'a Services,
    ) -> Self {
        Self {
            tree,
            me,
            event,
            args,
            services,
        }
    }

    /// The node of the handling model.
    pub fn me(&self) -> NodeId {
        self.me
    }

    /// Name of the handling model.
    pub fn name(&self) -> &str {
        self.tree.name(self.me)
    }

    pub fn full_path(&self) -> String {
        self.tree.full_path(self.me)
    }

    pub fn event(&self) -> &str {
        self.event
    }

    pub fn args(&self) -> Option<&VariableValue> {
        self.args
    }

    pub fn today(&self) -> Option<NaiveDate> {
        self.services.today
    }

    /// Today's date, failing when no day is in progress.
    pub fn require_today(&self) -> AgsimResult<NaiveDate> {
        self.services.today.ok_or_else(|| {
            AgsimError::Error(format!("No simulated date during {}", self.event))
        })
    }

    fn linked_id<T: ?Sized>(&self, link: &Link<T>) -> AgsimResult<NodeId> {
        link.id().ok_or_else(|| {
            AgsimError::Error(format!(
                "{} used a link before it was resolved",
                self.tree.full_path(self.me)
            ))
        })
    }

    /// Dereference a typed link.
    pub fn get<T: Model>(&self, link: &Link<T>) -> AgsimResult<&T> {
        let id = self.linked_id(link)?;
        self.tree.get::<T>(id)
    }

    pub fn get_mut<T: Model>(&mut self, link: &Link<T>) -> AgsimResult<&mut T> {
        let id = self.linked_id(link)?;
        self.tree.get_mut::<T>(id)
    }

    /// Dereference a capability or untyped path link.
    pub fn linked(&self, link: &Link<dyn Model>) -> AgsimResult<&dyn Model> {
        let id = self.linked_id(link)?;
        self.tree.model(id)
    }

    pub fn model(&self, id: NodeId) -> AgsimResult<&dyn Model> {
        self.tree.model(id)
    }

    pub fn tree(&self) -> &ModelTree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ModelTree {
        self.tree
    }

    /// Read a property through a path resolved from the handling model.
    pub fn variable(&self, path: &str) -> AgsimResult<VariableValue> {
        self.tree.get_variable(self.me, path)
    }

    /// Write a message to the simulation's summary.
    pub fn summary(&self, message: &str, severity: Severity) -> AgsimResult<()> {
        self.services.summary.write(
            self.services.today,
            &self.tree.full_path(self.me),
            message,
            severity,
        )
    }

    /// Append a row to a table of the simulation's storage.
    pub fn write_row(&self, table: &str, row: Row) -> AgsimResult<()> {
        self.services.storage.write_row(table, row)
    }
}

/// Event name to subscriber map for one simulation.
#[derive(Debug, Default, Clone)]
pub struct EventBus {
    subscribers: HashMap<String, Vec<NodeId>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the subscriptions of every model under `root` (inclusive).
    pub fn connect(tree: &ModelTree, root: NodeId) -> AgsimResult<Self> {
        let mut bus = Self::new();
        for id in tree.subtree(root) {
            for event in tree.model(id)?.subscriptions() {
                bus.subscribers.entry(event).or_default().push(id);
            }
        }
        Ok(bus)
    }

    /// Subscribe a model to an event, keeping subscribers in pre-order.
    pub fn subscribe(&mut self, tree: &ModelTree, id: NodeId, event: &str) -> AgsimResult<()> {
        tree.node(id)?;
        let list = self.subscribers.entry(event.to_string()).or_default();
        if list.contains(&id) {
            return Ok(());
        }
        list.push(id);
        if let Some(root) = tree.root() {
            let rank = tree.preorder_rank(root);
            list.sort_by_key(|n| rank.get(n).copied().unwrap_or(usize::MAX));
        }
        Ok(())
    }

    /// Remove a model from an event's subscribers. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, id: NodeId, event: &str) -> bool {
        match self.subscribers.get_mut(event) {
            Some(list) => {
                let before = list.len();
                list.retain(|n| *n != id);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn subscribers(&self, event: &str) -> &[NodeId] {
        self.subscribers
            .get(event)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Call every subscriber of `event` located under `root`, in pre-order.
    pub fn publish(
        &self,
        tree: &mut ModelTree,
        root: NodeId,
        event: &str,
        args: Option<&VariableValue>,
        services: &Services,
    ) -> AgsimResult<()> {
        for &id in self.subscribers(event) {
            if !tree.contains(id) || !tree.is_within(id, root) {
                continue;
            }
            trace!(event, model = %tree.full_path(id), "dispatch");
            let mut model = tree.take_model(id)?;
            let result = {
                let mut ctx = EventContext::new(tree, id, event, args, services);
                model.handle_event(event, &mut ctx)
            };
            tree.restore_model(id, model)?;

            if let Err(error) = result {
                return Err(match error {
                    AgsimError::Runtime { .. } | AgsimError::Cancelled(_) => error,
                    other => AgsimError::Runtime {
                        model: tree.full_path(id),
                        event: event.to_string(),
                        message: other.to_string(),
                    },
                });
            }
        }
        Ok(())
    }
}
