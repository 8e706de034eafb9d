//! Scheduling of simulation jobs.
//!
//! Jobs run either one after another on the runner's thread or on a bounded `rayon`
//! pool where every worker pulls the next job from a shared queue. A failing job never
//! affects the others; failures are collected into the [`RunReport`].

use crate::errors::{AgsimError, AgsimResult, SimulationError};
use crate::simulation::SimulationUnit;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Cooperative cancellation flag shared between a runner and its jobs.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A unit of work for the [`JobRunner`].
pub trait Job: Send {
    fn name(&self) -> &str;

    /// Run to completion, checking `stop` at safe points.
    fn run(&mut self, stop: &StopToken) -> AgsimResult<()>;

    /// The failure captured by the last run, when the job records its own.
    fn failure(&self) -> Option<SimulationError> {
        None
    }
}

/// A lazy supply of jobs, pulled one at a time.
pub trait JobSource: Send {
    fn next_job(&mut self) -> Option<Box<dyn Job>>;
}

impl Job for SimulationUnit {
    fn name(&self) -> &str {
        SimulationUnit::name(self)
    }

    fn run(&mut self, stop: &StopToken) -> AgsimResult<()> {
        let result = SimulationUnit::run(self, stop);
        self.release();
        result
    }

    fn failure(&self) -> Option<SimulationError> {
        self.error().cloned()
    }
}

/// A job standing in for a simulation that could not be created.
#[derive(Debug)]
pub struct FailedJob {
    error: SimulationError,
}

impl FailedJob {
    pub fn new(error: SimulationError) -> Self {
        Self { error }
    }
}

impl Job for FailedJob {
    fn name(&self) -> &str {
        &self.error.simulation
    }

    fn run(&mut self, _stop: &StopToken) -> AgsimResult<()> {
        Err(AgsimError::Error(self.error.message.clone()))
    }

    fn failure(&self) -> Option<SimulationError> {
        Some(self.error.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Serial,
    Parallel { workers: usize },
}

impl RunMode {
    /// Parallel over `workers` threads, or every available core for 0.
    pub fn parallel(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        RunMode::Parallel { workers }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: usize,
    pub name: String,
    pub status: JobStatus,
    pub error: Option<SimulationError>,
    pub elapsed: Duration,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Tickets of every job that was started, ordered by job id.
    pub tickets: Vec<JobTicket>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn number_of_jobs(&self) -> usize {
        self.tickets.len()
    }

    pub fn completed(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(JobStatus::Cancelled)
    }

    fn count(&self, status: JobStatus) -> usize {
        self.tickets.iter().filter(|t| t.status == status).count()
    }

    /// Errors of failed jobs. Cancelled jobs are not errors.
    pub fn errors(&self) -> Vec<&SimulationError> {
        self.tickets
            .iter()
            .filter(|t| t.status == JobStatus::Failed)
            .filter_map(|t| t.error.as_ref())
            .collect()
    }

    pub fn some_had_errors(&self) -> bool {
        self.tickets.iter().any(|t| t.status == JobStatus::Failed)
    }
}

impl fmt::Display for RunReport {
    /// Errors grouped by the simulation they came from.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut grouped: IndexMap<&str, Vec<&SimulationError>> = IndexMap::new();
        for error in self.errors() {
            grouped.entry(&error.simulation).or_default().push(error);
        }
        if grouped.is_empty() {
            return Ok(());
        }
        writeln!(f, "ERRORS FOUND!!")?;
        for (simulation, errors) in grouped {
            writeln!(f, "{}:", simulation)?;
            for error in errors {
                match &error.model {
                    Some(model) => writeln!(f, "    {} ({})", error.message, model)?,
                    None => writeln!(f, "    {}", error.message)?,
                }
            }
        }
        Ok(())
    }
}

pub type CompletionCallback = Arc<dyn Fn(&JobTicket) + Send + Sync>;

#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<(usize, Box<dyn Job>)>,
    sources: VecDeque<Box<dyn JobSource>>,
    next_id: usize,
}

impl JobQueue {
    fn next(&mut self) -> Option<(usize, Box<dyn Job>)> {
        if let Some(job) = self.jobs.pop_front() {
            return Some(job);
        }
        while let Some(source) = self.sources.front_mut() {
            if let Some(job) = source.next_job() {
                let id = self.next_id;
                self.next_id += 1;
                return Some((id, job));
            }
            self.sources.pop_front();
        }
        None
    }
}

/// Runs queued jobs serially or on a worker pool.
pub struct JobRunner {
    mode: RunMode,
    queue: Arc<Mutex<JobQueue>>,
    stop: StopToken,
    on_complete: Option<CompletionCallback>,
    worker: Option<JoinHandle<AgsimResult<RunReport>>>,
    report: Option<RunReport>,
}

impl JobRunner {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            queue: Arc::new(Mutex::new(JobQueue::default())),
            stop: StopToken::new(),
            on_complete: None,
            worker: None,
            report: None,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    fn lock_queue(&self) -> AgsimResult<std::sync::MutexGuard<'_, JobQueue>> {
        self.queue
            .lock()
            .map_err(|_| AgsimError::Error("Job queue lock poisoned".to_string()))
    }

    /// Queue a job. Returns its id.
    pub fn add_job(&mut self, job: Box<dyn Job>) -> AgsimResult<usize> {
        let mut queue = self.lock_queue()?;
        let id = queue.next_id;
        queue.next_id += 1;
        queue.jobs.push_back((id, job));
        Ok(id)
    }

    /// Queue a lazy source of jobs, drained after the jobs queued directly.
    pub fn add_source(&mut self, source: Box<dyn JobSource>) -> AgsimResult<()> {
        self.lock_queue()?.sources.push_back(source);
        Ok(())
    }

    /// Called from the worker thread as each job finishes.
    pub fn on_complete(&mut self, callback: impl Fn(&JobTicket) + Send + Sync + 'static) {
        self.on_complete = Some(Arc::new(callback));
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Ask running jobs to stop at their next safe point and start no new ones.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Begin running queued jobs on a background thread.
    pub fn start(&mut self, wait_until_finished: bool) -> AgsimResult<()> {
        if self.worker.is_some() {
            return Err(AgsimError::Error("Job runner already started".to_string()));
        }
        let mode = self.mode;
        let queue = self.queue.clone();
        let stop = self.stop.clone();
        let callback = self.on_complete.clone();
        let worker = std::thread::Builder::new()
            .name("job-runner".to_string())
            .spawn(move || execute(mode, &queue, &stop, callback.as_deref()))?;
        self.worker = Some(worker);
        if wait_until_finished {
            let report = self.join()?;
            self.report = Some(report);
        }
        Ok(())
    }

    fn join(&mut self) -> AgsimResult<RunReport> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| AgsimError::Error("Job runner thread panicked".to_string()))?,
            None => Ok(RunReport::default()),
        }
    }

    /// Block until every job has finished (or the run was stopped) and return the report.
    pub fn wait(&mut self) -> AgsimResult<RunReport> {
        match self.report.take() {
            Some(report) => Ok(report),
            None => self.join(),
        }
    }
}

fn execute(
    mode: RunMode,
    queue: &Mutex<JobQueue>,
    stop: &StopToken,
    callback: Option<&(dyn Fn(&JobTicket) + Send + Sync)>,
) -> AgsimResult<RunReport> {
    let started = Instant::now();
    let tickets = Mutex::new(Vec::new());
    match mode {
        RunMode::Serial => work(queue, stop, callback, &tickets),
        RunMode::Parallel { workers } => {
            let workers = workers.max(1);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("simulation-worker-{}", i))
                .build()
                .map_err(|e| AgsimError::Error(format!("Cannot build worker pool: {}", e)))?;
            pool.scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|_| work(queue, stop, callback, &tickets));
                }
            });
        }
    }

    let mut tickets = tickets
        .into_inner()
        .map_err(|_| AgsimError::Error("Ticket list lock poisoned".to_string()))?;
    tickets.sort_by_key(|t| t.id);
    let report = RunReport {
        tickets,
        elapsed: started.elapsed(),
    };
    info!(
        jobs = report.number_of_jobs(),
        failed = report.errors().len(),
        "Run finished in {:.2?}",
        report.elapsed
    );
    Ok(report)
}

/// Pull and run jobs until the queue is empty or a stop is requested.
fn work(
    queue: &Mutex<JobQueue>,
    stop: &StopToken,
    callback: Option<&(dyn Fn(&JobTicket) + Send + Sync)>,
    tickets: &Mutex<Vec<JobTicket>>,
) {
    while !stop.is_stopped() {
        // Release the queue before running the job.
        let next = match queue.lock() {
            Ok(mut queue) => queue.next(),
            Err(_) => {
                error!("Job queue lock poisoned");
                return;
            }
        };
        let Some((id, mut job)) = next else {
            return;
        };

        let ticket = run_job(id, job.as_mut(), stop);
        drop(job);
        if let Some(callback) = callback {
            callback(&ticket);
        }
        match tickets.lock() {
            Ok(mut tickets) => tickets.push(ticket),
            Err(_) => error!("Ticket list lock poisoned"),
        }
    }
}

fn run_job(id: usize, job: &mut dyn Job, stop: &StopToken) -> JobTicket {
    let name = job.name().to_string();
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| job.run(stop)));
    let elapsed = started.elapsed();

    let (status, error) = match outcome {
        Ok(Ok(())) => {
            info!(simulation = %name, "Completed in {:.2?}", elapsed);
            (JobStatus::Completed, None)
        }
        Ok(Err(AgsimError::Cancelled(_))) => {
            warn!(simulation = %name, "Cancelled");
            (JobStatus::Cancelled, None)
        }
        Ok(Err(e)) => {
            error!(simulation = %name, "{}", e);
            let captured = job
                .failure()
                .unwrap_or_else(|| SimulationError::new(&name, &e));
            (JobStatus::Failed, Some(captured))
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(simulation = %name, "Panicked: {}", message);
            (
                JobStatus::Failed,
                Some(SimulationError::from_message(
                    &name,
                    format!("panicked: {}", message),
                )),
            )
        }
    };

    JobTicket {
        id,
        name,
        status,
        error,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct CountingJob {
        name: String,
        fail: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Job for CountingJob {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, _stop: &StopToken) -> AgsimResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AgsimError::Error(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn jobs(runner: &mut JobRunner, count: usize, failing: usize) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        for i in 0..count {
            runner
                .add_job(Box::new(CountingJob {
                    name: format!("Sim{}", i),
                    fail: i == failing,
                    runs: runs.clone(),
                }))
                .unwrap();
        }
        runs
    }

    #[test]
    fn one_failure_among_ten_serial() {
        let mut runner = JobRunner::new(RunMode::Serial);
        let runs = jobs(&mut runner, 10, 4);
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(report.completed(), 9);
        assert!(report.some_had_errors());
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].simulation, "Sim4");
        assert!(report.to_string().contains("Sim4:\n    Sim4 failed"));
    }

    #[test]
    fn one_failure_among_ten_parallel() {
        let mut runner = JobRunner::new(RunMode::Parallel { workers: 3 });
        let runs = jobs(&mut runner, 10, 7);
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = completed.clone();
        runner.on_complete(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        runner.start(false).unwrap();
        let report = runner.wait().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(completed.load(Ordering::SeqCst), 10);
        assert_eq!(report.number_of_jobs(), 10);
        assert_eq!(report.completed(), 9);
        assert_eq!(report.errors().len(), 1);
        let ids: Vec<_> = report.tickets.iter().map(|t| t.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn stopped_runner_starts_nothing() {
        let mut runner = JobRunner::new(RunMode::Serial);
        let runs = jobs(&mut runner, 3, usize::MAX);
        runner.stop();
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(report.number_of_jobs(), 0);
        assert!(!report.some_had_errors());
    }

    #[test]
    fn panicking_job_is_reported_not_propagated() {
        struct Panics;
        impl Job for Panics {
            fn name(&self) -> &str {
                "Boom"
            }
            fn run(&mut self, _stop: &StopToken) -> AgsimResult<()> {
                panic!("model exploded")
            }
        }

        let mut runner = JobRunner::new(RunMode::Serial);
        runner.add_job(Box::new(Panics)).unwrap();
        jobs(&mut runner, 1, usize::MAX);
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();
        assert_eq!(report.completed(), 1);
        assert!(report.errors()[0].message.contains("model exploded"));
    }

    #[test]
    fn cancelled_jobs_are_not_errors() {
        struct Cancelled;
        impl Job for Cancelled {
            fn name(&self) -> &str {
                "Stopped"
            }
            fn run(&mut self, _stop: &StopToken) -> AgsimResult<()> {
                Err(AgsimError::Cancelled("Stopped".to_string()))
            }
        }

        let mut runner = JobRunner::new(RunMode::Serial);
        runner.add_job(Box::new(Cancelled)).unwrap();
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();
        assert_eq!(report.cancelled(), 1);
        assert!(!report.some_had_errors());
        assert_eq!(report.to_string(), "");
    }

    #[test]
    fn one_failing_simulation_among_ten_generated() {
        use crate::enumerator::SimulationEnumerator;
        use crate::model::Simulations;
        use crate::simulation::Simulation;
        use crate::storage::MemoryStore;
        use crate::test_models::{clock, Failing};
        use crate::tree::ModelTree;

        let mut tree = ModelTree::new();
        let root = tree.add_root("Simulations", Simulations::default()).unwrap();
        for i in 0..10 {
            let sim = tree
                .add_child(root, &format!("Sim{}", i), Simulation::default())
                .unwrap();
            tree.add_child(sim, "Clock", clock(5)).unwrap();
            if i == 6 {
                tree.add_child(sim, "Broken", Failing::on_day(2)).unwrap();
            }
        }
        let enumerator = SimulationEnumerator::from_tree(tree, Arc::new(MemoryStore::new())).unwrap();

        let mut runner = JobRunner::new(RunMode::Parallel { workers: 4 });
        runner.add_source(Box::new(enumerator)).unwrap();
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();

        assert_eq!(report.number_of_jobs(), 10);
        assert_eq!(report.completed(), 9);
        assert!(report.some_had_errors());
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].simulation, "Sim6");
        assert_eq!(errors[0].model.as_deref(), Some(".Sim6.Broken"));
        assert!(report.to_string().contains("Failed on day 2"));
    }

    #[test]
    fn failed_jobs_keep_the_originating_model() {
        let error = SimulationError {
            simulation: "Grazing".to_string(),
            model: Some(".Grazing.Stock".to_string()),
            message: "No groups".to_string(),
            cancelled: false,
        };
        let mut runner = JobRunner::new(RunMode::Serial);
        runner.add_job(Box::new(FailedJob::new(error.clone()))).unwrap();
        runner.start(true).unwrap();
        let report = runner.wait().unwrap();

        assert_eq!(report.errors(), vec![&error]);
        assert!(report.to_string().contains("    No groups (.Grazing.Stock)"));
    }
}
