//! Resumable orchestration of the Synthea to CDM pipeline.
//!
//! A [`Plan`] lists [`Stage`]s in dependency order. The [`Orchestrator`]
//! executes it against one store, records every completed stage in a
//! JSON checkpoint and, on the next run, continues after the last stage
//! that completed.

pub mod checkpoint;
pub mod error;
pub mod failure;
pub mod identity;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod stage;
pub mod stages;

pub use checkpoint::{CheckpointFile, CheckpointState, StageFailure, StageStats};
pub use error::{CheckpointError, PipelineError, PreconditionError, Result};
pub use failure::{FailureKind, classify};
pub use identity::pipeline_id;
pub use orchestrator::Orchestrator;
pub use plan::{Plan, Step, standard_plan};
pub use report::{RunFailure, RunReport, RunState, StageReport, StageStatus};
pub use stage::{Stage, StageContext, StageOutcome};
pub use stages::{
    KEY_BOOTSTRAP, KeyBootstrapStage, LoadStage, REPAIR, RepairStage, STAGE_LOAD, TransformStage,
    VALIDATE, ValidateStage,
};
