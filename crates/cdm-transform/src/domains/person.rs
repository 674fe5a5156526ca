use std::time::Instant;

use chrono::Datelike;

use cdm_map::{ethnicity_concept, gender_concept, race_concept};
use cdm_model::{EntityKind, SourceEntity, Value};

use super::{known_key, log_report};
use crate::context::TransformContext;
use crate::dates::{DateField, parse_date};
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::PERSON;
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Patients into `person`. A patient needs a mapped id and a birth date.
pub struct PersonTransform;

impl DomainTransform for PersonTransform {
    fn name(&self) -> &'static str {
        PERSON
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(SourceEntity::Patients)
    }

    fn targets(&self) -> &'static [&'static str] {
        &[PERSON]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), SourceEntity::Patients)?;
        let mut report = TransformReport::new(self.name());
        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            PERSON,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;

        for row in staged.rows() {
            report.rows_read += 1;
            let id = row.get("Id");
            let Some(person_id) = known_key(ctx, EntityKind::Subject, id)? else {
                report.orphan_rows += 1;
                continue;
            };
            let Some(birth) = parse_date(row.get("BIRTHDATE")) else {
                report.invalid_dates += 1;
                continue;
            };
            let death = match DateField::read(row.get("DEATHDATE")) {
                DateField::Invalid => {
                    report.invalid_dates += 1;
                    None
                }
                field => field.date(),
            };
            let gender = row.get("GENDER");
            let race = row.get("RACE");
            let ethnicity = row.get("ETHNICITY");
            writer.push(vec![
                Value::Int(person_id),
                Value::Int(gender_concept(gender)),
                Value::Int(i64::from(birth.year())),
                Value::Int(i64::from(birth.month())),
                Value::Int(i64::from(birth.day())),
                Value::Date(birth),
                death.into(),
                Value::Int(race_concept(race)),
                Value::Int(ethnicity_concept(ethnicity)),
                Value::text(id),
                Value::non_empty_text(gender),
                Value::non_empty_text(race),
                Value::non_empty_text(ethnicity),
            ])?;
        }

        report.written(PERSON, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testing::{context, stage};

    #[test]
    fn builds_person_rows() {
        let ctx = context();
        stage(
            &ctx,
            SourceEntity::Patients,
            &[
                &["p1", "1980-04-02", "", "white", "nonhispanic", "F"],
                &["p2", "not a date", "", "black", "hispanic", "M"],
                &["p3", "1990-01-01", "someday", "asian", "hispanic", "M"],
                &["ghost", "1990-01-01", "", "", "", ""],
            ],
        );
        for id in ["p1", "p2", "p3"] {
            ctx.keys.assign(EntityKind::Subject, id).unwrap();
        }

        let report = PersonTransform.run(&ctx).unwrap();
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.orphan_rows, 1);
        assert_eq!(report.invalid_dates, 2);

        let rows = ctx.store.scan(PERSON).unwrap();
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[0][1], Value::Int(8532));
        assert_eq!(rows[0][2], Value::Int(1980));
        assert_eq!(rows[0][7], Value::Int(8527));
        assert_eq!(rows[1][0], Value::Int(3));
        assert_eq!(rows[1][6], Value::Null);
    }
}
