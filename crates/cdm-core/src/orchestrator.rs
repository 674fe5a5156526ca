//! Checkpointed, fail-fast execution of a [`Plan`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{error, info, info_span, warn};

use cdm_ingest::ProgressSink;
use cdm_map::ConceptCatalog;
use cdm_model::{CancellationToken, PipelineConfig, StoreBackend};
use cdm_store::open_store;

use crate::checkpoint::{CheckpointFile, CheckpointState, StageStats};
use crate::error::{PreconditionError, Result};
use crate::failure::{FailureKind, classify};
use crate::identity::pipeline_id;
use crate::plan::{Plan, standard_plan};
use crate::report::{RunFailure, RunReport, RunState, StageReport, StageStatus};
use crate::stage::{Stage, StageContext, StageOutcome};

/// Result of executing one stage, before it is recorded.
struct Execution {
    name: &'static str,
    elapsed: Duration,
    result: anyhow::Result<StageOutcome>,
}

/// Runs a plan stage by stage, skipping stages an earlier run completed.
///
/// The orchestrator is the only writer of the checkpoint document. It is
/// rewritten after every stage that completes or fails, so a crash at any
/// point loses at most the stage that was running.
pub struct Orchestrator {
    plan: Plan,
    context: StageContext,
    checkpoint: CheckpointFile,
    pipeline_id: String,
}

impl Orchestrator {
    pub fn new(plan: Plan, context: StageContext) -> Self {
        let checkpoint = CheckpointFile::new(&context.config.checkpoint_path);
        let pipeline_id = pipeline_id(&context.config.input_dir);
        Self {
            plan,
            context,
            checkpoint,
            pipeline_id,
        }
    }

    /// Builds the standard pipeline: opens the store, loads the
    /// vocabulary and checks inputs before any stage runs.
    pub fn from_config(
        mut config: PipelineConfig,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if !config.input_dir.is_dir() {
            return Err(PreconditionError::InputDirectory(config.input_dir.clone()).into());
        }
        let catalog = match &config.vocabulary {
            Some(path) if !path.is_file() => {
                return Err(PreconditionError::Vocabulary(path.clone()).into());
            }
            Some(path) => ConceptCatalog::load(path)?,
            None => ConceptCatalog::empty(),
        };
        if config.store == StoreBackend::Memory && !config.force_restart {
            warn!("in-memory store keeps nothing between runs, ignoring the checkpoint");
            config.force_restart = true;
        }

        let store = open_store(&config.store, config.retry)?;
        let context = StageContext::new(config.clone(), store)
            .with_progress(progress)
            .with_cancellation(cancel);
        let transform = context
            .transform
            .clone()
            .with_catalog(Arc::new(catalog));
        let context = context.with_transform(transform);
        Ok(Self::new(standard_plan(&config), context))
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    pub fn run(&self) -> Result<RunReport> {
        let span = info_span!("pipeline", id = %self.pipeline_id);
        let _guard = span.enter();
        let start = Instant::now();
        self.plan.check_order()?;

        let mut state = self.initial_state()?;
        state.config = Some(self.context.config.clone());
        self.checkpoint.save(&state)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.context.config.workers.max(1))
            .build()?;

        let mut report = RunReport::new(&self.pipeline_id, self.checkpoint.path().to_path_buf());
        report.state = RunState::Running;
        info!(
            stages = self.plan.stage_names().len(),
            completed = state.completed_steps.len(),
            "pipeline started"
        );

        for step in self.plan.steps() {
            if self.context.cancel().is_cancelled() {
                warn!("cancellation requested, stopping before the next stage");
                report.state = RunState::Aborted;
                break;
            }

            let mut pending = Vec::new();
            for stage in step.stages() {
                if state.is_completed(stage.name()) {
                    info!(stage = stage.name(), "already completed, skipping");
                    report.stages.push(StageReport::from_stats(
                        stage.name(),
                        StageStatus::Skipped,
                        state.stats.get(stage.name()),
                    ));
                } else {
                    pending.push(stage);
                }
            }

            let executions = self.execute_all(&pool, &state, &pending);
            for execution in executions {
                self.record(execution, &mut state, &mut report)?;
            }
            if report.failure.is_some() {
                break;
            }
        }

        if report.state == RunState::Running {
            report.state = RunState::Completed;
        }
        self.mark_unreached(&mut report);
        report.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            state = report.state.as_str(),
            duration_ms = start.elapsed().as_millis(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn initial_state(&self) -> Result<CheckpointState> {
        if self.context.config.force_restart {
            info!("force restart, discarding checkpoint");
            return Ok(CheckpointState::new(&self.pipeline_id));
        }
        match self.checkpoint.load()? {
            Some(state) if state.pipeline_id.as_deref() == Some(self.pipeline_id.as_str()) => {
                info!(
                    completed = state.completed_steps.len(),
                    path = %self.checkpoint.path().display(),
                    "resuming from checkpoint"
                );
                Ok(state)
            }
            Some(state) => {
                warn!(
                    found = state.pipeline_id.as_deref().unwrap_or("none"),
                    expected = %self.pipeline_id,
                    "checkpoint belongs to another pipeline, starting fresh"
                );
                Ok(CheckpointState::new(&self.pipeline_id))
            }
            None => Ok(CheckpointState::new(&self.pipeline_id)),
        }
    }

    fn execute_all(
        &self,
        pool: &ThreadPool,
        state: &CheckpointState,
        pending: &[&dyn Stage],
    ) -> Vec<Execution> {
        match pending {
            [] => Vec::new(),
            [stage] => vec![pool.install(|| self.execute(*stage, state))],
            stages => pool.install(|| {
                stages
                    .par_iter()
                    .map(|stage| self.execute(*stage, state))
                    .collect()
            }),
        }
    }

    fn execute(&self, stage: &dyn Stage, state: &CheckpointState) -> Execution {
        let name = stage.name();
        let span = info_span!("stage", stage = name);
        let _guard = span.enter();
        let start = Instant::now();

        let missing = stage
            .dependencies()
            .iter()
            .find(|dependency| !state.is_completed(dependency));
        let result = match missing {
            Some(dependency) => Err(PreconditionError::DependencyIncomplete {
                stage: name,
                dependency: *dependency,
            }
            .into()),
            None => {
                info!("stage running");
                stage.run(&self.context)
            }
        };
        Execution {
            name,
            elapsed: start.elapsed(),
            result,
        }
    }

    fn record(
        &self,
        execution: Execution,
        state: &mut CheckpointState,
        report: &mut RunReport,
    ) -> Result<()> {
        let Execution {
            name,
            elapsed,
            result,
        } = execution;
        match result {
            Ok(outcome) => {
                let stats = StageStats {
                    duration_seconds: elapsed.as_secs_f64(),
                    rows: outcome.rows,
                    counters: outcome.counters,
                    completed_at: Utc::now(),
                };
                info!(
                    stage = name,
                    rows = stats.rows,
                    duration_ms = elapsed.as_millis(),
                    "stage completed"
                );
                state.mark_completed(name, stats);
                self.checkpoint.save(state)?;
                report.stages.push(StageReport::from_stats(
                    name,
                    StageStatus::Completed,
                    state.stats.get(name),
                ));
            }
            Err(err) => {
                let kind = classify(&err);
                let reason = format!("{err:#}");
                report
                    .stages
                    .push(StageReport::failed(name, elapsed.as_secs_f64()));
                if kind == FailureKind::Cancelled {
                    warn!(stage = name, "stage cancelled");
                    report.state = RunState::Aborted;
                } else {
                    error!(stage = name, kind = kind.as_str(), error = %reason, "stage failed");
                    state.mark_failed(name, kind, reason.clone());
                    self.checkpoint.save(state)?;
                    report.state = RunState::Failed;
                }
                if report.failure.is_none() {
                    report.failure = Some(RunFailure {
                        stage: name.to_string(),
                        kind,
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    fn mark_unreached(&self, report: &mut RunReport) {
        for name in self.plan.stage_names() {
            if report.stage(name).is_none() {
                report
                    .stages
                    .push(StageReport::from_stats(name, StageStatus::NotRun, None));
            }
        }
    }
}
