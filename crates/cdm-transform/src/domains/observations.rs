use std::time::Instant;

use sha2::{Digest, Sha256};

use cdm_map::{LOINC, classify_observation};
use cdm_model::{
    ConceptDomain, EHR_TYPE_CONCEPT_ID, EntityKind, ObservationValue, SourceEntity, Value,
};

use super::{key_cell, known_key, log_report};
use crate::context::TransformContext;
use crate::dates::parse_date;
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::{MEASUREMENT, OBSERVATION};
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Deterministic external key of a staged observation row: its ordinal
/// plus a digest of its content.
///
/// Re-running the transform over the same staged table yields the same
/// keys, so the key mapper hands back the same ids.
pub fn observation_external_key(ordinal: usize, cells: &[Value]) -> String {
    let mut hasher = Sha256::new();
    for cell in cells {
        hasher.update(cell.to_string().as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("{ordinal}:{}", &digest[..16])
}

/// Observations split by value class: numeric values into `measurement`,
/// everything else into `observation`.
pub struct ObservationTransform;

impl DomainTransform for ObservationTransform {
    fn name(&self) -> &'static str {
        "observations"
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(SourceEntity::Observations)
    }

    fn targets(&self) -> &'static [&'static str] {
        &[MEASUREMENT, OBSERVATION]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), SourceEntity::Observations)?;
        let mut report = TransformReport::new(self.name());
        let store = ctx.store.as_ref();
        let mut measurements =
            TableWriter::create(store, MEASUREMENT, self.name(), ctx.batch_size, &ctx.cancel)?;
        let mut observations =
            TableWriter::create(store, OBSERVATION, self.name(), ctx.batch_size, &ctx.cancel)?;

        for row in staged.rows() {
            report.rows_read += 1;
            let Some(person_id) = known_key(ctx, EntityKind::Subject, row.get("PATIENT"))? else {
                report.orphan_rows += 1;
                continue;
            };
            let Some(date) = parse_date(row.get("DATE")) else {
                report.invalid_dates += 1;
                continue;
            };
            let code = row.get("CODE");
            let units = Value::non_empty_text(row.get("UNITS"));
            let visit = key_cell(ctx, EntityKind::Encounter, row.get("ENCOUNTER"))?;
            let external = observation_external_key(row.ordinal, row.cells());

            match classify_observation(row.raw("VALUE")) {
                ObservationValue::Numeric { value } => {
                    let id = ctx.keys.assign(EntityKind::Measurement, &external)?;
                    let mapping = ctx.catalog.map_concept(code, LOINC, ConceptDomain::Measurement);
                    if !mapping.is_mapped() {
                        report.unmapped += 1;
                    }
                    measurements.push(vec![
                        Value::Int(id),
                        Value::Int(person_id),
                        Value::Int(mapping.target_concept_id),
                        Value::Date(date),
                        Value::Int(EHR_TYPE_CONCEPT_ID),
                        Value::Real(value),
                        units,
                        visit,
                        Value::non_empty_text(code),
                        Value::text(row.raw("VALUE")),
                    ])?;
                }
                ObservationValue::NonNumeric { text } => {
                    let id = ctx.keys.assign(EntityKind::Observation, &external)?;
                    let mapping = ctx.catalog.map_concept(code, LOINC, ConceptDomain::Observation);
                    if !mapping.is_mapped() {
                        report.unmapped += 1;
                    }
                    observations.push(vec![
                        Value::Int(id),
                        Value::Int(person_id),
                        Value::Int(mapping.target_concept_id),
                        Value::Date(date),
                        Value::Int(EHR_TYPE_CONCEPT_ID),
                        Value::from(text),
                        units,
                        visit,
                        Value::non_empty_text(code),
                    ])?;
                }
            }
        }

        report.written(MEASUREMENT, measurements.finish()?);
        report.written(OBSERVATION, observations.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testing::{context, stage};

    fn staged_rows() -> Vec<[&'static str; 8]> {
        vec![
            ["2020-01-01", "p1", "", "8480-6", "Systolic", "120", "mm[Hg]", "numeric"],
            ["2020-01-01", "p1", "", "72166-2", "Tobacco", "Never smoker", "", "text"],
            ["2020-01-01", "p1", "", "8310-5", "Temp", "98.6", "F", "numeric"],
            ["2020-01-01", "p1", "", "X", "Empty", "", "", "text"],
        ]
    }

    #[test]
    fn splits_numeric_and_text_values() {
        let ctx = context();
        let rows = staged_rows();
        let refs: Vec<&[&str]> = rows.iter().map(|row| row.as_slice()).collect();
        stage(&ctx, SourceEntity::Observations, &refs);
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();

        let report = ObservationTransform.run(&ctx).unwrap();
        assert_eq!(report.tables[MEASUREMENT], 2);
        assert_eq!(report.tables[OBSERVATION], 2);

        let measurements = ctx.store.scan(MEASUREMENT).unwrap();
        assert_eq!(measurements[0][5], Value::Real(120.0));
        assert_eq!(measurements[1][5], Value::Real(98.6));
        let observations = ctx.store.scan(OBSERVATION).unwrap();
        assert_eq!(observations[0][5], Value::text("Never smoker"));
        assert_eq!(observations[1][5], Value::text(""));
    }

    #[test]
    fn rerun_reuses_observation_keys() {
        let ctx = context();
        let rows = staged_rows();
        let refs: Vec<&[&str]> = rows.iter().map(|row| row.as_slice()).collect();
        stage(&ctx, SourceEntity::Observations, &refs);
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();

        ObservationTransform.run(&ctx).unwrap();
        let first = ctx.store.scan(MEASUREMENT).unwrap();
        ObservationTransform.run(&ctx).unwrap();
        assert_eq!(ctx.store.scan(MEASUREMENT).unwrap(), first);
        let audit = ctx.keys.audit(EntityKind::Measurement).unwrap();
        assert_eq!(audit.mappings, 2);
    }

    #[test]
    fn external_key_depends_on_position_and_content() {
        let cells = [Value::text("a"), Value::Null];
        let key = observation_external_key(3, &cells);
        assert!(key.starts_with("3:"));
        assert_eq!(key.len(), 2 + 16);
        assert_eq!(key, observation_external_key(3, &cells));
        assert_ne!(key, observation_external_key(4, &cells));
        assert_ne!(key, observation_external_key(3, &[Value::text("b"), Value::Null]));
    }
}
