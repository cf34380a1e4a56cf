use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use pursuit_core::{TargetSample, TrialOutcome};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ExperimentError, Result};

/// Append-only JSON-lines file.
pub struct JsonlLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ExperimentError::io(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&mut self, row: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| ExperimentError::io(&self.path, e))
    }

    /// Pushes buffered rows to disk and waits for the device.
    pub fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| ExperimentError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| ExperimentError::io(&self.path, e))
    }

    /// Reads every row of `path`; a missing file reads as empty. A torn
    /// final line from an interrupted write is skipped.
    pub fn read_all<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ExperimentError::io(path, e)),
        };
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .map_err(|e| ExperimentError::io(path, e))?;
        let last = lines.len().saturating_sub(1);
        let mut rows = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(row) => rows.push(row),
                Err(e) if i == last => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping torn final row");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(rows)
    }
}

/// Per-participant outcome log and target trace, written as each trial ends.
pub struct ResultLogs {
    outcomes: JsonlLog,
    trace: JsonlLog,
}

impl ResultLogs {
    pub fn open(outcomes_path: impl AsRef<Path>, trace_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            outcomes: JsonlLog::open(outcomes_path)?,
            trace: JsonlLog::open(trace_path)?,
        })
    }

    /// Trace first, outcome last: an outcome row on disk implies its trace
    /// is there too.
    pub fn record(&mut self, outcome: &TrialOutcome, trace: &[TargetSample]) -> Result<()> {
        for sample in trace {
            self.trace.append(sample)?;
        }
        self.trace.sync()?;
        self.outcomes.append(outcome)?;
        self.outcomes.sync()?;
        tracing::debug!(
            trial = outcome.trial_index,
            status = ?outcome.status,
            samples = trace.len(),
            "outcome persisted"
        );
        Ok(())
    }

    /// Trial indices already logged as successful, for resuming a run.
    pub fn completed_trials(outcomes_path: impl AsRef<Path>) -> Result<BTreeSet<usize>> {
        let rows: Vec<TrialOutcome> = JsonlLog::read_all(outcomes_path)?;
        Ok(rows
            .into_iter()
            .filter(|o| o.is_success())
            .map(|o| o.trial_index)
            .collect())
    }
}
