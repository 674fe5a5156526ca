//! The unit of work the orchestrator schedules.

use std::collections::BTreeMap;
use std::sync::Arc;

use cdm_ingest::{NoProgress, ProgressSink};
use cdm_model::{CancellationToken, PipelineConfig};
use cdm_store::Store;
use cdm_transform::TransformContext;

/// What a completed stage reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Stage-defined row count recorded in the checkpoint.
    pub rows: u64,
    pub counters: BTreeMap<String, u64>,
}

impl StageOutcome {
    pub fn rows(rows: u64) -> Self {
        Self {
            rows,
            counters: BTreeMap::new(),
        }
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    pub fn with_counters(mut self, counters: BTreeMap<String, u64>) -> Self {
        self.counters.extend(counters);
        self
    }
}

/// A named pipeline step.
///
/// Stages may run more than once (a crashed or failed run repeats the stage
/// it was in), so `run` must leave the same result when repeated.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stages that must have completed before this one starts.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome>;
}

/// Shared collaborators for every stage of one run.
#[derive(Clone)]
pub struct StageContext {
    pub config: PipelineConfig,
    pub transform: TransformContext,
    pub progress: Arc<dyn ProgressSink>,
}

impl StageContext {
    pub fn new(config: PipelineConfig, store: Arc<dyn Store>) -> Self {
        let transform = TransformContext::new(store).with_batch_size(config.batch_size);
        Self {
            config,
            transform,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_transform(mut self, transform: TransformContext) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.transform = self.transform.with_cancellation(cancel);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.transform.store
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.transform.cancel
    }
}
