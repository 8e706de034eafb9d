use super::{DataStore, Row};
use crate::errors::{AgsimError, AgsimResult};
use indexmap::IndexMap;
use std::sync::Mutex;

/// A row as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub simulation: String,
    pub values: Row,
}

/// Keeps every row in memory. Used by tests and by runs that only need the summary.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<IndexMap<String, Vec<StoredRow>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> IndexMap<String, Vec<StoredRow>> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the tables written so far, in order of first write.
    pub fn tables(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.snapshot().get(table).cloned().unwrap_or_default()
    }

    /// Rows of `table` written by one simulation.
    pub fn rows_for(&self, simulation: &str, table: &str) -> Vec<Row> {
        self.rows(table)
            .into_iter()
            .filter(|r| r.simulation == simulation)
            .map(|r| r.values)
            .collect()
    }
}

impl DataStore for MemoryStore {
    fn write_row(&self, simulation: &str, table: &str, row: Row) -> AgsimResult<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| AgsimError::Error("Memory store lock poisoned".to_string()))?;
        tables
            .entry(table.to_string())
            .or_default()
            .push(StoredRow {
                simulation: simulation.to_string(),
                values: row,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VariableValue;
    use std::sync::Arc;

    #[test]
    fn concurrent_appends_are_all_kept() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for day in 0..25 {
                        let mut row = Row::new();
                        row.insert("Day".to_string(), VariableValue::Integer(day));
                        store.write_row(&format!("Sim{}", i), "Report", row).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.rows("Report").len(), 100);
        assert_eq!(store.rows_for("Sim2", "Report").len(), 25);
        assert_eq!(store.tables(), vec!["Report".to_string()]);
    }
}
