//! Checkpoint document: which stages completed, with what stats.
//!
//! The document is only written by the orchestrator, always through a
//! temp file and a rename, so a reader sees either the previous or the new
//! document. Readers that still hit a partial file (e.g. on filesystems
//! without atomic rename) re-read a few times before giving up.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cdm_model::PipelineConfig;

use crate::error::CheckpointError;
use crate::failure::FailureKind;

const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Statistics recorded for a completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub duration_seconds: f64,
    /// Stage-defined row count.
    pub rows: u64,
    /// Recoverable-error and detail counters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    pub completed_at: DateTime<Utc>,
}

/// Why the last attempt of a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Persisted progress of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub pipeline_id: Option<String>,
    pub completed_steps: BTreeSet<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub stats: BTreeMap<String, StageStats>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, StageFailure>,
    #[serde(default)]
    pub config: Option<PipelineConfig>,
}

impl CheckpointState {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: Some(pipeline_id.into()),
            ..Self::default()
        }
    }

    pub fn is_completed(&self, stage: &str) -> bool {
        self.completed_steps.contains(stage)
    }

    /// Records a completion; stats and the completed flag always move
    /// together.
    pub fn mark_completed(&mut self, stage: &str, stats: StageStats) {
        self.completed_steps.insert(stage.to_string());
        self.stats.insert(stage.to_string(), stats);
        self.failures.remove(stage);
        self.touch();
    }

    pub fn mark_failed(&mut self, stage: &str, kind: FailureKind, reason: impl Into<String>) {
        self.completed_steps.remove(stage);
        self.stats.remove(stage);
        self.failures.insert(
            stage.to_string(),
            StageFailure {
                kind,
                reason: reason.into(),
                failed_at: Utc::now(),
            },
        );
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

/// Location of a checkpoint document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document; `None` when it does not exist.
    pub fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let mut attempt = 1;
        loop {
            let text = match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(source) => {
                    return Err(CheckpointError::Io {
                        operation: "read",
                        path: self.path.clone(),
                        source,
                    });
                }
            };
            match serde_json::from_str(&text) {
                Ok(state) => return Ok(Some(state)),
                Err(source) if attempt >= READ_ATTEMPTS => {
                    return Err(CheckpointError::Corrupt {
                        path: self.path.clone(),
                        source,
                    });
                }
                Err(err) => {
                    debug!(attempt, error = %err, "torn checkpoint read, retrying");
                    attempt += 1;
                    thread::sleep(READ_RETRY_DELAY);
                }
            }
        }
    }

    /// Replaces the document atomically.
    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(CheckpointError::Serialize)?;
        let io = |operation, path: &Path, source| CheckpointError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io("create directory", parent, e))?;
        }
        let temp = self.path.with_extension("json.tmp");
        let mut file = File::create(&temp).map_err(|e| io("create", &temp, e))?;
        file.write_all(&bytes).map_err(|e| io("write", &temp, e))?;
        file.sync_all().map_err(|e| io("sync", &temp, e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|source| CheckpointError::AtomicWriteFailed {
            temp: temp.clone(),
            target: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "saved checkpoint");
        Ok(())
    }

    /// Deletes the document; a missing document is not an error.
    pub fn remove(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => {
                warn!(path = %self.path.display(), "could not remove checkpoint");
                Err(CheckpointError::Io {
                    operation: "remove",
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}
