//! Running every simulation of a set of files.

use agsim_core::config::RunnerConfig;
use agsim_core::enumerator::SimulationEnumerator;
use agsim_core::runner::{JobRunner, RunMode, RunReport};
use agsim_core::storage::DataStore;
use agsim_core::{file, AgsimResult, SimulationError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Result of running a set of files.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Files that could not be loaded, reported against the file name.
    pub load_errors: Vec<SimulationError>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn number_of_simulations(&self) -> usize {
        self.report.number_of_jobs()
    }

    pub fn some_had_errors(&self) -> bool {
        !self.load_errors.is_empty() || self.report.some_had_errors()
    }

    pub fn exit_code(&self) -> u8 {
        u8::from(self.some_had_errors())
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.load_errors.is_empty() {
            writeln!(f, "Could not load:")?;
            for error in &self.load_errors {
                writeln!(f, "{}:", error.simulation)?;
                writeln!(f, "    {}", error.message)?;
            }
        }
        write!(f, "{}", self.report)?;
        write!(
            f,
            "Finished running {} simulations. Duration {:.2} sec.",
            self.number_of_simulations(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Load each file and run all of its simulations into the configured output store.
///
/// A relative output directory is resolved against `output_base`.
pub fn run_files(files: &[PathBuf], config: &RunnerConfig, output_base: &Path) -> AgsimResult<RunOutcome> {
    let store = config.open_store(output_base)?;
    run_files_into(files, config.run_mode(), store)
}

/// Load each file and run all of its simulations, writing output to `store`.
///
/// A file that fails to load is reported and skipped; its siblings still run.
pub fn run_files_into(files: &[PathBuf], mode: RunMode, store: Arc<dyn DataStore>) -> AgsimResult<RunOutcome> {
    let started = Instant::now();
    let mut runner = JobRunner::new(mode);
    let finished = AtomicUsize::new(0);
    runner.on_complete(move |ticket| {
        let count = finished.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(simulation = %ticket.name, status = ?ticket.status, finished = count, "Job finished");
    });

    let mut load_errors = Vec::new();
    for path in files {
        let name = path.display().to_string();
        match file::read(path).and_then(|tree| SimulationEnumerator::from_tree(tree, store.clone())) {
            Ok(enumerator) => {
                info!(file = %name, simulations = ?enumerator.simulation_names(), "Queued");
                runner.add_source(Box::new(enumerator))?;
            }
            Err(e) => {
                error!(file = %name, "{}", e);
                load_errors.push(SimulationError::new(name, &e));
            }
        }
    }

    runner.start(true)?;
    let report = runner.wait()?;
    store.flush()?;
    Ok(RunOutcome {
        report,
        load_errors,
        elapsed: started.elapsed(),
    })
}
