use super::Model;
use crate::value::VariableValue;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top level container of a simulation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Simulations {
    /// Where the tree was read from. Set on load, never serialized.
    #[serde(skip)]
    pub file_name: Option<PathBuf>,
}

#[typetag::serde]
impl Model for Simulations {
    fn get(&self, property: &str) -> Option<VariableValue> {
        match property {
            "FileName" => self
                .file_name
                .as_ref()
                .map(|p| VariableValue::Text(p.display().to_string())),
            _ => None,
        }
    }
}

/// Groups models without affecting how they run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Folder {}

#[typetag::serde]
impl Model for Folder {}

/// A spatial area of a simulation, e.g. a paddock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Zone {
    /// Area in hectares.
    pub area: f64,
}

impl Default for Zone {
    fn default() -> Self {
        Self { area: 1.0 }
    }
}

#[typetag::serde]
impl Model for Zone {
    fn get(&self, property: &str) -> Option<VariableValue> {
        match property {
            "Area" => Some(VariableValue::Number(self.area)),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: VariableValue) -> crate::errors::AgsimResult<()> {
        match (property, value.as_f64()) {
            ("Area", Some(area)) => {
                self.area = area;
                Ok(())
            }
            _ => Err(crate::errors::AgsimError::Error(format!(
                "Cannot set Zone.{} to {}",
                property, value
            ))),
        }
    }
}
