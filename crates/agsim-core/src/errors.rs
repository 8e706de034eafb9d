use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum AgsimError {
    #[error("{0}")]
    Error(String),
    #[error("Invalid simulation specification '{source_name}': {message}")]
    Structural {
        source_name: String,
        message: String,
    },
    #[error("Cannot find model '{segment}' while resolving path '{path}'")]
    NodeNotFound { path: String, segment: String },
    #[error("Model at path '{path}' is a {found}, expected {expected}")]
    WrongType {
        path: String,
        expected: String,
        found: String,
    },
    #[error("Cannot resolve link '{field}' ({target}) declared by model '{model}'")]
    MissingDependency {
        model: String,
        field: String,
        target: String,
    },
    #[error("Error in model '{model}' during {event}: {message}")]
    Runtime {
        model: String,
        event: String,
        message: String,
    },
    #[error("Model '{0}' is currently handling an event and cannot be accessed")]
    ModelBusy(String),
    #[error("Invalid node handle {0}")]
    InvalidNode(usize),
    #[error("Simulation '{0}' was stopped before completion")]
    Cancelled(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl AgsimError {
    /// The model an error originated from, if the error carries one.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            AgsimError::MissingDependency { model, .. } | AgsimError::Runtime { model, .. } => {
                Some(model)
            }
            AgsimError::ModelBusy(model) => Some(model),
            _ => None,
        }
    }
}

/// Convenience type for `Result<T, AgsimError>`.
pub type AgsimResult<T> = Result<T, AgsimError>;

/// A failure captured against a single simulation.
///
/// Unlike [`AgsimError`] this is cheap to clone so it can be copied into job tickets
/// and run reports while the originating simulation is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationError {
    pub simulation: String,
    pub model: Option<String>,
    pub message: String,
    pub cancelled: bool,
}

impl SimulationError {
    pub fn new(simulation: impl Into<String>, error: &AgsimError) -> Self {
        Self {
            simulation: simulation.into(),
            model: error.model_name().map(str::to_string),
            message: error.to_string(),
            cancelled: matches!(error, AgsimError::Cancelled(_)),
        }
    }

    pub fn from_message(simulation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            simulation: simulation.into(),
            model: None,
            message: message.into(),
            cancelled: false,
        }
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "[{}] {} ({})", self.simulation, self.message, model),
            None => write!(f, "[{}] {}", self.simulation, self.message),
        }
    }
}

impl std::error::Error for SimulationError {}
