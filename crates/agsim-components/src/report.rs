use agsim_core::events::{EventContext, DO_REPORT};
use agsim_core::storage::Row;
use agsim_core::{AgsimError, AgsimResult, Model};
use serde::{Deserialize, Serialize};

/// Writes one row of named variables to storage each time one of its events fires.
///
/// Each entry of `VariableNames` is a path to a property, e.g. `[Clock].Today`,
/// optionally followed by `as <Column>`. Rows go to a table named after the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Report {
    pub variable_names: Vec<String>,
    pub event_names: Vec<String>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            variable_names: Vec::new(),
            event_names: vec![DO_REPORT.to_string()],
        }
    }
}

impl Report {
    pub fn new<S: Into<String>>(variable_names: impl IntoIterator<Item = S>) -> Self {
        Self {
            variable_names: variable_names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn on_events<S: Into<String>>(mut self, event_names: impl IntoIterator<Item = S>) -> Self {
        self.event_names = event_names.into_iter().map(Into::into).collect();
        self
    }

    /// Column layout as `(path, column name)` pairs.
    pub fn columns(&self) -> Vec<(&str, &str)> {
        self.variable_names
            .iter()
            .map(|name| split_alias(name.trim()))
            .collect()
    }
}

fn split_alias(name: &str) -> (&str, &str) {
    match name.rsplit_once(" as ") {
        Some((path, alias)) => (path.trim(), alias.trim()),
        None => (name, name),
    }
}

#[typetag::serde]
impl Model for Report {
    fn subscriptions(&self) -> Vec<String> {
        self.event_names.clone()
    }

    fn handle_event(&mut self, event: &str, ctx: &mut EventContext<'_>) -> AgsimResult<()> {
        let mut row = Row::new();
        for (path, column) in self.columns() {
            let value = ctx.variable(path).map_err(|e| {
                AgsimError::Error(format!("Cannot report '{}' on {}: {}", path, event, e))
            })?;
            row.insert(column.to_string(), value);
        }
        let table = ctx.name().to_string();
        ctx.write_row(&table, row)
    }
}
