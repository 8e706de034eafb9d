//! Run configuration.
//!
//! Read from a TOML file; every field is optional.
//!
//! ```toml
//! workers = 4
//! single_threaded = false
//!
//! [output]
//! kind = "csv"
//! directory = "output"
//! ```

use crate::errors::AgsimResult;
use crate::runner::RunMode;
use crate::storage::{CsvStore, DataStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Keep rows in memory for the lifetime of the run.
    #[default]
    Memory,
    /// One CSV file per table.
    Csv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub kind: OutputKind,
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::Memory,
            directory: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker threads; 0 uses every available core.
    pub workers: usize,
    pub single_threaded: bool,
    pub output: OutputConfig,
}

impl RunnerConfig {
    pub fn from_toml(text: &str) -> AgsimResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> AgsimResult<Self> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn run_mode(&self) -> RunMode {
        if self.single_threaded {
            RunMode::Serial
        } else {
            RunMode::parallel(self.workers)
        }
    }

    /// Open the configured output store.
    ///
    /// A relative CSV directory is taken relative to `base`.
    pub fn open_store(&self, base: &Path) -> AgsimResult<Arc<dyn DataStore>> {
        Ok(match self.output.kind {
            OutputKind::Memory => Arc::new(MemoryStore::new()),
            OutputKind::Csv => Arc::new(CsvStore::new(base.join(&self.output.directory))?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = RunnerConfig::from_toml("").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.output.kind, OutputKind::Memory);
        assert!(matches!(config.run_mode(), RunMode::Parallel { workers } if workers >= 1));
    }

    #[test]
    fn parses_a_full_file() {
        let config = RunnerConfig::from_toml(
            r#"
            workers = 3
            [output]
            kind = "csv"
            directory = "results"
            "#,
        )
        .unwrap();
        assert_eq!(config.run_mode(), RunMode::Parallel { workers: 3 });
        assert_eq!(config.output.kind, OutputKind::Csv);
        assert_eq!(config.output.directory, PathBuf::from("results"));

        let serial = RunnerConfig {
            single_threaded: true,
            ..config
        };
        assert_eq!(serial.run_mode(), RunMode::Serial);
    }

    #[test]
    fn rejects_unknown_output_kinds() {
        assert!(RunnerConfig::from_toml("[output]\nkind = \"sqlite\"").is_err());
    }

    #[test]
    fn opens_a_csv_store_under_the_base_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            output: OutputConfig {
                kind: OutputKind::Csv,
                directory: PathBuf::from("out"),
            },
            ..RunnerConfig::default()
        };
        let store = config.open_store(dir.path()).unwrap();
        store.flush().unwrap();
        assert!(dir.path().join("out").is_dir());
    }
}
