use super::{DataStore, Row, SIMULATION_COLUMN};
use crate::errors::{AgsimError, AgsimResult};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error};

enum Command {
    Row {
        simulation: String,
        table: String,
        row: Row,
    },
    Flush(mpsc::Sender<Result<(), String>>),
}

/// Writes each table to `<directory>/<table>.csv`.
///
/// All files are owned by a single writer thread fed over a channel, so any number of
/// simulations can append concurrently. A table's columns are `SimulationName` followed
/// by every column seen so far, in first-seen order. A row with a new column widens the
/// file in place, leaving the column blank for earlier rows.
#[derive(Debug)]
pub struct CsvStore {
    directory: PathBuf,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CsvStore {
    pub fn new(directory: impl Into<PathBuf>) -> AgsimResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        let (sender, receiver) = mpsc::channel();
        let worker_directory = directory.clone();
        let worker = std::thread::Builder::new()
            .name("csv-writer".to_string())
            .spawn(move || write_loop(&worker_directory, receiver))?;
        Ok(Self {
            directory,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn send(&self, command: Command) -> AgsimResult<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| AgsimError::Error("CSV store lock poisoned".to_string()))?;
        sender
            .as_ref()
            .ok_or_else(|| AgsimError::Error("CSV store is closed".to_string()))?
            .send(command)
            .map_err(|_| AgsimError::Error("CSV writer thread has stopped".to_string()))
    }

    /// Flush outstanding rows and stop the writer thread.
    pub fn close(&self) -> AgsimResult<()> {
        let result = self.flush();
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(worker) = self.worker.lock().ok().and_then(|mut w| w.take()) {
            worker
                .join()
                .map_err(|_| AgsimError::Error("CSV writer thread panicked".to_string()))?;
        }
        result
    }
}

impl Drop for CsvStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Closing CSV store: {}", e);
        }
    }
}

impl DataStore for CsvStore {
    fn write_row(&self, simulation: &str, table: &str, row: Row) -> AgsimResult<()> {
        self.send(Command::Row {
            simulation: simulation.to_string(),
            table: table.to_string(),
            row,
        })
    }

    fn flush(&self) -> AgsimResult<()> {
        let (reply, response) = mpsc::channel();
        self.send(Command::Flush(reply))?;
        response
            .recv()
            .map_err(|_| AgsimError::Error("CSV writer thread has stopped".to_string()))?
            .map_err(AgsimError::Error)
    }
}

struct TableFile {
    path: PathBuf,
    writer: csv::Writer<File>,
    columns: Vec<String>,
}

impl TableFile {
    fn create(path: PathBuf, columns: Vec<String>) -> AgsimResult<Self> {
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&columns)?;
        debug!(path = %path.display(), "Created output table");
        Ok(Self {
            path,
            writer,
            columns,
        })
    }

    /// Rewrite the file with `added` columns appended to the header.
    fn widen(&mut self, added: Vec<String>) -> AgsimResult<()> {
        self.writer.flush()?;
        let records = csv::Reader::from_path(&self.path)?
            .into_records()
            .collect::<Result<Vec<_>, _>>()?;

        self.columns.extend(added);
        let width = self.columns.len();
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(&self.columns)?;
        for record in &records {
            let mut fields: Vec<&str> = record.iter().collect();
            fields.resize(width, "");
            writer.write_record(&fields)?;
        }
        self.writer = writer;
        debug!(path = %self.path.display(), columns = width, "Widened output table");
        Ok(())
    }
}

fn write_loop(directory: &Path, commands: mpsc::Receiver<Command>) {
    let mut tables: HashMap<String, TableFile> = HashMap::new();
    let mut failure: Option<String> = None;

    for command in commands {
        match command {
            Command::Row {
                simulation,
                table,
                row,
            } => {
                if failure.is_some() {
                    continue;
                }
                if let Err(e) = append(directory, &mut tables, &simulation, &table, &row) {
                    error!(table = %table, "Failed writing output: {}", e);
                    failure = Some(e.to_string());
                }
            }
            Command::Flush(reply) => {
                let mut result = match &failure {
                    Some(message) => Err(message.clone()),
                    None => Ok(()),
                };
                for file in tables.values_mut() {
                    if let Err(e) = file.writer.flush() {
                        result = Err(e.to_string());
                    }
                }
                // The requester may have given up waiting.
                let _ = reply.send(result);
            }
        }
    }

    for file in tables.values_mut() {
        if let Err(e) = file.writer.flush() {
            error!("Failed flushing output: {}", e);
        }
    }
}

fn append(
    directory: &Path,
    tables: &mut HashMap<String, TableFile>,
    simulation: &str,
    table: &str,
    row: &Row,
) -> AgsimResult<()> {
    let file = match tables.entry(table.to_string()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let mut columns = vec![SIMULATION_COLUMN.to_string()];
            columns.extend(row.keys().cloned());
            entry.insert(TableFile::create(directory.join(format!("{}.csv", table)), columns)?)
        }
    };

    let added: Vec<String> = row
        .keys()
        .filter(|key| !file.columns.contains(*key))
        .cloned()
        .collect();
    if !added.is_empty() {
        file.widen(added)?;
    }

    let record: Vec<String> = file
        .columns
        .iter()
        .map(|column| {
            if column == SIMULATION_COLUMN {
                simulation.to_string()
            } else {
                row.get(column).map(|v| v.to_string()).unwrap_or_default()
            }
        })
        .collect();
    file.writer.write_record(&record)?;
    Ok(())
}
