use std::time::Instant;

use cdm_map::visit_concept;
use cdm_model::{EHR_TYPE_CONCEPT_ID, EntityKind, SourceEntity, UNMAPPED_CONCEPT_ID, Value};

use super::{key_cell, known_key, log_report};
use crate::context::TransformContext;
use crate::dates::{DateField, parse_date};
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::VISIT_OCCURRENCE;
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Encounters into `visit_occurrence`.
pub struct VisitTransform;

impl DomainTransform for VisitTransform {
    fn name(&self) -> &'static str {
        VISIT_OCCURRENCE
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(SourceEntity::Encounters)
    }

    fn targets(&self) -> &'static [&'static str] {
        &[VISIT_OCCURRENCE]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), SourceEntity::Encounters)?;
        let mut report = TransformReport::new(self.name());
        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            VISIT_OCCURRENCE,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;

        for row in staged.rows() {
            report.rows_read += 1;
            let visit = known_key(ctx, EntityKind::Encounter, row.get("Id"))?;
            let person = known_key(ctx, EntityKind::Subject, row.get("PATIENT"))?;
            let (Some(visit_id), Some(person_id)) = (visit, person) else {
                report.orphan_rows += 1;
                continue;
            };
            let Some(visit_start) = parse_date(row.get("START")) else {
                report.invalid_dates += 1;
                continue;
            };
            let visit_end = match DateField::read(row.get("STOP")) {
                DateField::Invalid => {
                    report.invalid_dates += 1;
                    None
                }
                field => field.date(),
            };
            let class = row.get("ENCOUNTERCLASS");
            let concept = visit_concept(class);
            if concept == UNMAPPED_CONCEPT_ID {
                report.unmapped += 1;
            }
            writer.push(vec![
                Value::Int(visit_id),
                Value::Int(person_id),
                Value::Int(concept),
                Value::Date(visit_start),
                visit_end.into(),
                Value::Int(EHR_TYPE_CONCEPT_ID),
                key_cell(ctx, EntityKind::Provider, row.get("PROVIDER"))?,
                key_cell(ctx, EntityKind::Facility, row.get("ORGANIZATION"))?,
                Value::non_empty_text(class),
            ])?;
        }

        report.written(VISIT_OCCURRENCE, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testing::{context, stage};

    #[test]
    fn maps_encounter_class_and_drops_orphans() {
        let ctx = context();
        stage(
            &ctx,
            SourceEntity::Encounters,
            &[
                &[
                    "e1",
                    "2020-01-01T10:00:00Z",
                    "2020-01-02T10:00:00Z",
                    "p1",
                    "",
                    "",
                    "emergency",
                    "50849002",
                    "ER visit",
                ],
                &["e2", "2020-02-01", "", "nobody", "", "", "wellness", "", ""],
                &["e3", "garbage", "", "p1", "", "", "snf", "", ""],
            ],
        );
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();
        let ids: Vec<String> = ["e1", "e2", "e3"].map(String::from).to_vec();
        ctx.keys.assign_many(EntityKind::Encounter, &ids).unwrap();

        let report = VisitTransform.run(&ctx).unwrap();
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.orphan_rows, 1);
        assert_eq!(report.invalid_dates, 1);

        let rows = ctx.store.scan(VISIT_OCCURRENCE).unwrap();
        assert_eq!(rows[0][2], Value::Int(9203));
        assert_eq!(
            rows[0][4].as_date().map(|d| d.to_string()),
            Some("2020-01-02".to_string())
        );
        assert_eq!(rows[0][6], Value::Null);
    }
}
