//! Human-readable simulation log.
//!
//! Messages are stored in the `_Messages` table of the simulation's storage and mirrored
//! to `tracing` at the matching level.

use crate::errors::AgsimResult;
use crate::model::Model;
use crate::storage::{DataStore, Row};
use crate::value::VariableValue;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const MESSAGES_TABLE: &str = "_Messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Information,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Configures the summary of the simulation it is placed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Summary {
    /// Messages less severe than this are not stored.
    pub verbosity: Severity,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            verbosity: Severity::Information,
        }
    }
}

#[typetag::serde]
impl Model for Summary {}

/// Writes summary messages for one simulation.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    simulation: String,
    store: Arc<dyn DataStore>,
    verbosity: Severity,
}

impl SummaryWriter {
    pub fn new(simulation: impl Into<String>, store: Arc<dyn DataStore>, verbosity: Severity) -> Self {
        Self {
            simulation: simulation.into(),
            store,
            verbosity,
        }
    }

    pub fn set_verbosity(&mut self, verbosity: Severity) {
        self.verbosity = verbosity;
    }

    pub fn write(
        &self,
        date: Option<NaiveDate>,
        model: &str,
        message: &str,
        severity: Severity,
    ) -> AgsimResult<()> {
        match severity {
            Severity::Information => info!(simulation = %self.simulation, model, "{}", message),
            Severity::Warning => warn!(simulation = %self.simulation, model, "{}", message),
            Severity::Error => error!(simulation = %self.simulation, model, "{}", message),
        }
        if severity < self.verbosity {
            return Ok(());
        }

        let mut row = Row::new();
        if let Some(date) = date {
            row.insert("Date".to_string(), VariableValue::Date(date));
        }
        row.insert("ComponentName".to_string(), VariableValue::from(model));
        row.insert("Message".to_string(), VariableValue::from(message));
        row.insert(
            "MessageType".to_string(),
            VariableValue::Text(severity.to_string()),
        );
        self.store.write_row(&self.simulation, MESSAGES_TABLE, row)
    }
}
