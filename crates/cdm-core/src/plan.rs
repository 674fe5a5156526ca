//! Pipeline topology: an ordered line of stages with parallel groups.

use std::collections::HashSet;

use cdm_model::PipelineConfig;

use crate::error::PreconditionError;
use crate::stage::Stage;
use crate::stages::{
    KEY_BOOTSTRAP, KeyBootstrapStage, LoadStage, RepairStage, TransformStage, ValidateStage,
};

/// One position in the plan.
pub enum Step {
    Single(Box<dyn Stage>),
    /// Independent stages that may run concurrently; the next step starts
    /// once all of them finished.
    Parallel(Vec<Box<dyn Stage>>),
}

impl Step {
    pub fn stages(&self) -> Vec<&dyn Stage> {
        match self {
            Self::Single(stage) => vec![stage.as_ref()],
            Self::Parallel(stages) => stages.iter().map(|stage| stage.as_ref()).collect(),
        }
    }
}

/// Ordered list of steps executed by the orchestrator.
#[derive(Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.steps.push(Step::Single(Box::new(stage)));
        self
    }

    pub fn parallel(mut self, stages: Vec<Box<dyn Stage>>) -> Self {
        if !stages.is_empty() {
            self.steps.push(Step::Parallel(stages));
        }
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .flat_map(Step::stages)
            .map(|stage| stage.name())
            .collect()
    }

    /// Checks that every dependency is scheduled in an earlier step.
    pub fn check_order(&self) -> Result<(), PreconditionError> {
        let mut earlier: HashSet<&'static str> = HashSet::new();
        for step in &self.steps {
            let stages = step.stages();
            for stage in &stages {
                for dependency in stage.dependencies() {
                    if !earlier.contains(dependency) {
                        return Err(PreconditionError::DependencyIncomplete {
                            stage: stage.name(),
                            dependency: *dependency,
                        });
                    }
                }
            }
            earlier.extend(stages.iter().map(|stage| stage.name()));
        }
        Ok(())
    }
}

/// The fixed CDM topology.
///
/// repair → stage_load → key_bootstrap → person → care_site → provider →
/// visit_occurrence → {condition, drug, procedure, observations} →
/// observation_period → [reclassify] → validate
pub fn standard_plan(config: &PipelineConfig) -> Plan {
    let transform = |name, dependencies: &[&'static str]| {
        TransformStage::new(name, dependencies.to_vec())
    };
    let mut plan = Plan::new()
        .then(RepairStage)
        .then(LoadStage)
        .then(KeyBootstrapStage)
        .then(transform("person", &[KEY_BOOTSTRAP]))
        .then(transform("care_site", &[KEY_BOOTSTRAP]))
        .then(transform("provider", &[KEY_BOOTSTRAP, "care_site"]))
        .then(transform("visit_occurrence", &[KEY_BOOTSTRAP, "person"]))
        .parallel(vec![
            Box::new(transform("condition_occurrence", &[KEY_BOOTSTRAP, "person"])),
            Box::new(transform("drug_exposure", &[KEY_BOOTSTRAP, "person"])),
            Box::new(transform("procedure_occurrence", &[KEY_BOOTSTRAP, "person"])),
            Box::new(transform("observations", &[KEY_BOOTSTRAP, "person"])),
        ])
        .then(transform("observation_period", &["visit_occurrence"]));
    if config.reclassify {
        plan = plan.then(transform("reclassify", &["observations"]));
    }
    let upstream = plan.stage_names();
    plan.then(ValidateStage::new(upstream))
}
