use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use cdm_map::{LOINC, reclassify_value};
use cdm_model::{ConceptDomain, EHR_TYPE_CONCEPT_ID, EntityKind, SourceEntity, Value};

use super::{column, log_report, read_target};
use crate::context::TransformContext;
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::{MEASUREMENT, OBSERVATION};
use crate::writer::TableWriter;

const STAGE: &str = "observations";

/// Maintenance pass moving `observation` rows whose text value is a number
/// once whitespace and thousands separators are removed into
/// `measurement`.
///
/// Moved rows get a measurement key derived from their observation id, so
/// repeating the pass never inserts a measurement twice.
pub struct ReclassifyTransform;

impl DomainTransform for ReclassifyTransform {
    fn name(&self) -> &'static str {
        "reclassify"
    }

    fn source(&self) -> Option<SourceEntity> {
        None
    }

    fn targets(&self) -> &'static [&'static str] {
        &[MEASUREMENT, OBSERVATION]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let (obs_schema, observations) = read_target(ctx, OBSERVATION, STAGE)?;
        let (meas_schema, measurements) = read_target(ctx, MEASUREMENT, STAGE)?;
        let id_idx = column(&obs_schema, "observation_id")?;
        let person_idx = column(&obs_schema, "person_id")?;
        let date_idx = column(&obs_schema, "observation_date")?;
        let text_idx = column(&obs_schema, "value_as_string")?;
        let unit_idx = column(&obs_schema, "unit_source_value")?;
        let visit_idx = column(&obs_schema, "visit_occurrence_id")?;
        let code_idx = column(&obs_schema, "observation_source_value")?;
        let existing: HashSet<i64> = {
            let idx = column(&meas_schema, "measurement_id")?;
            measurements.iter().filter_map(|row| row[idx].as_i64()).collect()
        };

        let mut report = TransformReport::new(self.name());
        let mut moved = TableWriter::append(
            ctx.store.as_ref(),
            MEASUREMENT,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;
        let mut kept = Vec::with_capacity(observations.len());
        let mut moved_rows = 0u64;

        for row in observations {
            report.rows_read += 1;
            let value = row[text_idx].as_str().and_then(reclassify_value);
            let (Some(value), Some(observation_id)) = (value, row[id_idx].as_i64()) else {
                kept.push(row);
                continue;
            };
            moved_rows += 1;
            let external = format!("reclassified:{observation_id}");
            let id = ctx.keys.assign(EntityKind::Measurement, &external)?;
            if existing.contains(&id) {
                debug!(observation_id, measurement_id = id, "already reclassified");
                continue;
            }
            let code = row[code_idx].as_str().unwrap_or("");
            let mapping = ctx
                .catalog
                .map_concept(code, LOINC, ConceptDomain::Measurement);
            if !mapping.is_mapped() {
                report.unmapped += 1;
            }
            moved.push(vec![
                Value::Int(id),
                row[person_idx].clone(),
                Value::Int(mapping.target_concept_id),
                row[date_idx].clone(),
                Value::Int(EHR_TYPE_CONCEPT_ID),
                Value::Real(value),
                row[unit_idx].clone(),
                row[visit_idx].clone(),
                row[code_idx].clone(),
                row[text_idx].clone(),
            ])?;
        }
        report.written(MEASUREMENT, moved.finish()?);

        if moved_rows > 0 {
            let mut rewrite = TableWriter::create(
                ctx.store.as_ref(),
                OBSERVATION,
                self.name(),
                ctx.batch_size,
                &ctx.cancel,
            )?;
            for row in kept {
                rewrite.push(row)?;
            }
            rewrite.finish()?;
        }
        report.moved = moved_rows;
        log_report(&report, start);
        Ok(report)
    }
}
