//! Run and stage summaries returned by the orchestrator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::checkpoint::StageStats;
use crate::failure::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    /// Interrupted by a cancellation signal.
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// What happened to a stage in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Completed by an earlier run.
    Skipped,
    Failed,
    NotRun,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotRun => "not run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub duration_seconds: f64,
    pub rows: Option<u64>,
    pub counters: BTreeMap<String, u64>,
}

impl StageReport {
    pub(crate) fn from_stats(name: &str, status: StageStatus, stats: Option<&StageStats>) -> Self {
        Self {
            name: name.to_string(),
            status,
            duration_seconds: stats.map_or(0.0, |stats| stats.duration_seconds),
            rows: stats.map(|stats| stats.rows),
            counters: stats.map(|stats| stats.counters.clone()).unwrap_or_default(),
        }
    }

    pub(crate) fn failed(name: &str, duration_seconds: f64) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Failed,
            duration_seconds,
            rows: None,
            counters: BTreeMap::new(),
        }
    }
}

/// The stage that halted a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub stage: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub pipeline_id: String,
    pub state: RunState,
    pub checkpoint: PathBuf,
    pub stages: Vec<StageReport>,
    pub failure: Option<RunFailure>,
    pub duration_seconds: f64,
}

impl RunReport {
    pub(crate) fn new(pipeline_id: &str, checkpoint: PathBuf) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            state: RunState::Pending,
            checkpoint,
            stages: Vec::new(),
            failure: None,
            duration_seconds: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Stages executed (successfully or not) in this run.
    pub fn executed(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|stage| matches!(stage.status, StageStatus::Completed | StageStatus::Failed))
    }

    /// Sum of each counter over all stages of this run.
    pub fn counter_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for stage in &self.stages {
            for (name, value) in &stage.counters {
                *totals.entry(name.clone()).or_default() += value;
            }
        }
        totals
    }
}
