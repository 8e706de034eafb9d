//! The capability trait implemented by every model type, and the serialized form of a
//! model subtree.
//!
//! Model types register themselves with `typetag`, so a simulation file can name any
//! model type linked into the binary through its `$type` discriminator without a central
//! list of types.

mod containers;

use crate::errors::{AgsimError, AgsimResult};
use crate::events::EventContext;
use crate::links::LinkSlot;
use crate::simulation::SimulationGenerator;
use crate::value::VariableValue;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use std::path::PathBuf;

pub use containers::{Folder, Simulations, Zone};

/// Dynamic type information for model trait objects.
///
/// Implemented for every `'static` type, so model implementations never need to
/// implement it by hand.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Unqualified name of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<T>()
    }
}

/// The unqualified name of a type, e.g. `Clock` for `agsim_core::clock::Clock`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    match full.rfind("::") {
        Some(index) => &full[index + 2..],
        None => full,
    }
}

/// A node of a simulation.
///
/// Every method has a default so that passive models (containers, parameter holders)
/// only need to derive their serialization.
#[typetag::serde(tag = "$type")]
pub trait Model: Debug + Send + Sync + AsAny {
    /// The dependency slots this model needs filled before the simulation starts.
    ///
    /// Called by the resolver every time links are resolved, so it must always
    /// return the same declarations.
    fn links(&mut self) -> Vec<LinkSlot<'_>> {
        Vec::new()
    }

    /// Names of the events this model handles.
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Respond to a published event.
    fn handle_event(&mut self, _event: &str, _ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        Ok(())
    }

    /// Read a named property.
    fn get(&self, _property: &str) -> Option<VariableValue> {
        None
    }

    /// Overwrite a named property, used when applying experiment factor levels.
    fn set(&mut self, property: &str, _value: VariableValue) -> AgsimResult<()> {
        Err(AgsimError::Error(format!(
            "{} has no settable property '{}'",
            <Self as AsAny>::type_name(self),
            property
        )))
    }

    /// Whether this model can stand in for a named capability (e.g. "Weather").
    fn provides(&self, _capability: &str) -> bool {
        false
    }

    /// Models that expand into one or more runnable simulations.
    fn as_generator(&self) -> Option<&dyn SimulationGenerator> {
        None
    }

    /// Paths to external files read by this model.
    ///
    /// Relative paths are rewritten against the simulation file's directory on load.
    fn file_references(&mut self) -> Vec<&mut PathBuf> {
        Vec::new()
    }
}

fn default_true() -> bool {
    true
}

/// Serialized form of a model and its descendants.
///
/// This is the shape a simulation file is written in:
///
/// ```json
/// {
///   "Name": "Clock",
///   "Model": { "$type": "Clock", "StartDate": "2000-01-01", "EndDate": "2000-12-31" },
///   "Children": []
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub include_in_documentation: bool,
    pub model: Box<dyn Model>,
    #[serde(default)]
    pub children: Vec<ModelSpec>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, model: impl Model + 'static) -> Self {
        Self {
            name: name.into(),
            include_in_documentation: true,
            model: Box::new(model),
            children: Vec::new(),
        }
    }

    /// Builder-style helper to append a child.
    pub fn with_child(mut self, child: ModelSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Number of models in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ModelSpec::count).sum::<usize>()
    }
}
