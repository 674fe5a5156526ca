//! The standard stages of the CDM pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use rayon::prelude::*;
use tracing::{info, warn};

use cdm_ingest::{
    BulkLoader, LoadAction, LoadOptions, NoProgress, RepairOptions, discover_inputs, repair_file,
};
use cdm_model::SourceEntity;
use cdm_transform::{
    TransformRegistry, VALIDATION_REPORT_FILE, bootstrap_keys, validate, write_report,
};

use crate::error::PreconditionError;
use crate::identity::pipeline_id;
use crate::stage::{Stage, StageContext, StageOutcome};

pub const REPAIR: &str = "repair";
pub const STAGE_LOAD: &str = "stage_load";
pub const KEY_BOOTSTRAP: &str = "key_bootstrap";
pub const VALIDATE: &str = "validate";

/// Repairs every discovered extract into the processed directory, one
/// worker per file.
pub struct RepairStage;

impl Stage for RepairStage {
    fn name(&self) -> &'static str {
        REPAIR
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let config = &ctx.config;
        let inventory = discover_inputs(&config.input_dir)?;
        let options = RepairOptions::from_config(config);
        let total = inventory.files.len() as u64;
        let done = AtomicU64::new(0);

        let reports = inventory
            .files
            .par_iter()
            .map(|(entity, path)| {
                let output = config.processed_dir.join(entity.file_name());
                let report = repair_file(path, &output, &options, &NoProgress)
                    .with_context(|| format!("repairing {}", path.display()))?;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.progress
                    .report(finished, total, &format!("repaired {entity}"));
                Ok(report)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        ctx.progress.finish("repair complete");

        let mut outcome = StageOutcome::default();
        let (mut read, mut repaired, mut skipped) = (0, 0, 0);
        for report in &reports {
            outcome.rows += report.rows_written;
            read += report.rows_read;
            repaired += report.repaired;
            skipped += report.skipped;
            for (strategy, rows) in &report.by_strategy {
                *outcome
                    .counters
                    .entry(format!("strategy_{strategy}"))
                    .or_default() += rows;
            }
        }
        if skipped > 0 {
            warn!(skipped, "rows could not be repaired and were dropped");
        }
        Ok(outcome
            .with_counter("rows_read", read)
            .with_counter("rows_repaired", repaired)
            .with_counter("rows_skipped", skipped)
            .with_counter("missing_optional_files", inventory.missing.len() as u64))
    }
}

/// Loads repaired files into the staged tables; absent optional extracts
/// become empty tables.
///
/// Tables are claimed for the pipeline id, so a load interrupted part-way
/// is replaced in full when the stage runs again.
pub struct LoadStage;

impl Stage for LoadStage {
    fn name(&self) -> &'static str {
        STAGE_LOAD
    }

    fn dependencies(&self) -> &[&'static str] {
        &[REPAIR]
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let store = ctx.store().as_ref();
        let options = LoadOptions::from_config(&ctx.config);
        let owner = pipeline_id(&ctx.config.input_dir);

        let reports = SourceEntity::ALL
            .par_iter()
            .map(|entity| {
                let table = entity.staging_table();
                let path = ctx.config.processed_dir.join(entity.file_name());
                let loader = BulkLoader::new(store, options)
                    .with_progress(ctx.progress.as_ref())
                    .with_cancellation(ctx.cancel())
                    .with_owner(&owner);
                let report = if path.is_file() {
                    loader.load_file(&path, &table)
                } else {
                    if entity.is_required() {
                        return Err(anyhow::Error::from(PreconditionError::RepairedFile(path)));
                    }
                    loader.stage_empty(&table, entity.columns())
                };
                report.with_context(|| format!("loading {table}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut outcome = StageOutcome::default();
        let (mut short, mut skipped) = (0, 0);
        for report in &reports {
            outcome.rows += report.post_count;
            if report.is_short() {
                short += 1;
            }
            if report.action == LoadAction::Skipped {
                skipped += 1;
            }
        }
        Ok(outcome
            .with_counter("short_loads", short)
            .with_counter("skipped_tables", skipped))
    }
}

/// Assigns surrogate keys to patients, encounters, organizations and
/// providers.
pub struct KeyBootstrapStage;

impl Stage for KeyBootstrapStage {
    fn name(&self) -> &'static str {
        KEY_BOOTSTRAP
    }

    fn dependencies(&self) -> &[&'static str] {
        &[STAGE_LOAD]
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let report = bootstrap_keys(&ctx.transform)?;
        let mut outcome = StageOutcome::rows(report.total());
        for (kind, mappings) in &report.mappings {
            outcome = outcome.with_counter(format!("keys_{kind}"), *mappings);
        }
        Ok(outcome.with_counter("missing_ids", report.missing_ids))
    }
}

/// Runs one registered domain transform.
pub struct TransformStage {
    name: &'static str,
    dependencies: Vec<&'static str>,
}

impl TransformStage {
    pub fn new(name: &'static str, dependencies: Vec<&'static str>) -> Self {
        Self { name, dependencies }
    }
}

impl Stage for TransformStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> &[&'static str] {
        &self.dependencies
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let registry = TransformRegistry::default();
        let transform = registry
            .get(self.name)
            .with_context(|| format!("no transform named {}", self.name))?;
        let report = transform.run(&ctx.transform)?;
        Ok(StageOutcome::rows(report.rows_written).with_counters(report.counters()))
    }
}

/// Checks the finished tables and writes `validation_report.json`.
pub struct ValidateStage {
    dependencies: Vec<&'static str>,
}

impl ValidateStage {
    pub fn new(dependencies: Vec<&'static str>) -> Self {
        Self { dependencies }
    }
}

impl Stage for ValidateStage {
    fn name(&self) -> &'static str {
        VALIDATE
    }

    fn dependencies(&self) -> &[&'static str] {
        &self.dependencies
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut report = validate(&ctx.transform)?;
        report.config = Some(ctx.config.clone());
        let path = ctx.config.processed_dir.join(VALIDATION_REPORT_FILE);
        write_report(&report, &path)?;
        if !report.is_clean() {
            warn!(path = %path.display(), "validation found integrity problems");
        }
        info!(path = %path.display(), "validation report written");

        let orphans = report.orphan_rows.values().sum();
        let inconsistent = report
            .key_audits
            .iter()
            .filter(|audit| !audit.is_consistent())
            .count() as u64;
        Ok(StageOutcome::rows(report.checked_rows)
            .with_counter("unmapped", report.concept_coverage.total_unmapped())
            .with_counter("orphan_rows", orphans)
            .with_counter("inconsistent_key_kinds", inconsistent))
    }
}
