//! Run every simulation in one or more simulation files.
//!
//! Usage: `agsim <file-spec> [--recurse] [--single-threaded] [--network --ip ADDR]`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use agsim::files::find_files;
use agsim::network;
use agsim::run::run_files;
use agsim_core::config::{OutputKind, RunnerConfig};
use agsim_core::AgsimResult;
use clap::Parser;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "agsim")]
#[command(about = "Run the simulations in one or more simulation files")]
struct Args {
    /// Simulation file, or a pattern such as `trials/*.json`
    file_spec: String,

    /// Also search subdirectories for files matching the pattern
    #[arg(long, short)]
    recurse: bool,

    /// Run simulations one at a time on the calling thread
    #[arg(long)]
    single_threaded: bool,

    /// Send the files to a run server instead of running them locally
    #[arg(long)]
    network: bool,

    /// Address of the run server (port 50000 unless given)
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Runner configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker threads (0 uses every core)
    #[arg(long)]
    workers: Option<usize>,

    /// Write simulation output as CSV files to this directory
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn runner_config(&self) -> AgsimResult<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::load(path)?,
            None => RunnerConfig::default(),
        };
        if self.single_threaded {
            config.single_threaded = true;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(directory) = &self.output {
            config.output.kind = OutputKind::Csv;
            config.output.directory = directory.clone();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    agsim::init_logging();
    debug!(models = ?agsim::model_types(), "Registered component models");

    let args = Args::parse();
    let result = if args.network {
        run_remote(&args)
    } else {
        run_local(&args)
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_local(args: &Args) -> AgsimResult<u8> {
    let config = args.runner_config()?;
    let files = find_files(&args.file_spec, args.recurse)?;
    let outcome = run_files(&files, &config, &spec_directory(&args.file_spec))?;

    if let Some(path) = &args.report {
        fs::write(path, serde_json::to_string_pretty(&outcome.report)?)?;
    }
    if outcome.some_had_errors() {
        eprintln!("{}", outcome);
    } else {
        println!("{}", outcome);
    }
    Ok(outcome.exit_code())
}

fn run_remote(args: &Args) -> AgsimResult<u8> {
    let files = network::gather_files(&args.file_spec, args.recurse)?;
    network::send(&args.ip, &files, &mut std::io::stdout().lock())?;
    Ok(0)
}

/// Directory of the file specification, against which relative output paths resolve.
fn spec_directory(spec: &str) -> PathBuf {
    match Path::new(spec).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
