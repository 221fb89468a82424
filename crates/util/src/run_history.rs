//! Run history persistence.
//!
//! Every finished (or abandoned) run is recorded as a [`RunRecord`]. The
//! scheduler reads the most recent logical date back to decide which intervals
//! are still due, and the CLI lists recent runs. The JSON-backed store follows
//! the same layout rules as the settings file (tilde expansion, config
//! directory fallback, environment override).

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use emrflow_types::{RunRecord, RunTrigger};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{config_file_path, expand_tilde};

/// Environment variable controlling the run history file location.
pub const RUN_HISTORY_PATH_ENV: &str = "EMRFLOW_HISTORY_PATH";

/// Default filename for the persisted run history.
pub const RUN_HISTORY_FILE_NAME: &str = "runs.json";

/// Maximum number of runs retained by the store.
pub const DEFAULT_RUN_HISTORY_LIMIT: usize = 200;

/// Errors surfaced by run history operations.
#[derive(Debug, Error)]
pub enum RunHistoryError {
    #[error("run history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Backends able to persist run records.
pub trait RunHistoryStore: Send + Sync {
    /// Insert a record, replacing any earlier record with the same run id.
    fn record(&self, record: RunRecord) -> Result<(), RunHistoryError>;

    /// Most recent runs first, across all workflows.
    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, RunHistoryError>;

    /// Latest logical date of a scheduled run of `workflow`, if any.
    fn last_logical_date(&self, workflow: &str) -> Result<Option<DateTime<Utc>>, RunHistoryError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RunHistoryFile {
    runs: VecDeque<RunRecord>,
}

impl RunHistoryFile {
    fn upsert(&mut self, record: RunRecord, limit: usize) {
        if let Some(position) = self
            .runs
            .iter()
            .position(|existing| existing.run_id == record.run_id && existing.workflow == record.workflow)
        {
            self.runs.remove(position);
        }
        self.runs.push_front(record);
        self.runs.truncate(limit);
    }

    fn recent(&self, limit: usize) -> Vec<RunRecord> {
        self.runs.iter().take(limit).cloned().collect()
    }

    fn last_logical_date(&self, workflow: &str) -> Option<DateTime<Utc>> {
        self.runs
            .iter()
            .filter(|run| run.workflow == workflow)
            .filter_map(|run| match run.trigger {
                RunTrigger::Scheduled { logical_date } => Some(logical_date),
                RunTrigger::Manual { .. } => None,
            })
            .max()
    }
}

fn lock(file: &Mutex<RunHistoryFile>) -> MutexGuard<'_, RunHistoryFile> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// JSON-backed run history persisted on disk.
pub struct JsonRunHistory {
    path: PathBuf,
    file: Mutex<RunHistoryFile>,
    max_entries: usize,
}

impl JsonRunHistory {
    /// Open the store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P, max_entries: usize) -> Result<Self, RunHistoryError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_run_history_path(),
        };
        let file = load_run_history_file(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            file: Mutex::new(file),
            max_entries,
        })
    }

    /// Open the store at the default location with the default limit.
    pub fn with_defaults() -> Result<Self, RunHistoryError> {
        Self::new(None::<PathBuf>, DEFAULT_RUN_HISTORY_LIMIT)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, file: &RunHistoryFile) -> Result<(), RunHistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl RunHistoryStore for JsonRunHistory {
    fn record(&self, record: RunRecord) -> Result<(), RunHistoryError> {
        let mut file = lock(&self.file);
        debug!(run_id = %record.run_id, status = ?record.status, "recording run");
        file.upsert(record, self.max_entries);
        self.save_locked(&file)
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, RunHistoryError> {
        Ok(lock(&self.file).recent(limit))
    }

    fn last_logical_date(&self, workflow: &str) -> Result<Option<DateTime<Utc>>, RunHistoryError> {
        Ok(lock(&self.file).last_logical_date(workflow))
    }
}

/// Volatile store used by tests and simulated runs.
#[derive(Debug)]
pub struct InMemoryRunHistory {
    file: Mutex<RunHistoryFile>,
    max_entries: usize,
}

impl Default for InMemoryRunHistory {
    fn default() -> Self {
        Self {
            file: Mutex::new(RunHistoryFile::default()),
            max_entries: DEFAULT_RUN_HISTORY_LIMIT,
        }
    }
}

impl RunHistoryStore for InMemoryRunHistory {
    fn record(&self, record: RunRecord) -> Result<(), RunHistoryError> {
        lock(&self.file).upsert(record, self.max_entries);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, RunHistoryError> {
        Ok(lock(&self.file).recent(limit))
    }

    fn last_logical_date(&self, workflow: &str) -> Result<Option<DateTime<Utc>>, RunHistoryError> {
        Ok(lock(&self.file).last_logical_date(workflow))
    }
}

/// Returns the default path for the run history file.
pub fn default_run_history_path() -> PathBuf {
    config_file_path(RUN_HISTORY_PATH_ENV, RUN_HISTORY_FILE_NAME)
}

fn load_run_history_file(path: &Path) -> Result<RunHistoryFile, RunHistoryError> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(RunHistoryFile::default()),
        Ok(content) => match serde_json::from_str(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!(path = %path.display(), %error, "run history is unreadable; starting empty");
                Ok(RunHistoryFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(RunHistoryFile::default()),
        Err(error) => Err(RunHistoryError::Io(error)),
    }
}
