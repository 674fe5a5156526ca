use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;

use cdm_model::{EHR_TYPE_CONCEPT_ID, SourceEntity, Value};

use super::{column, log_report, read_target};
use crate::context::TransformContext;
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::{OBSERVATION_PERIOD, VISIT_OCCURRENCE};
use crate::writer::TableWriter;

/// One `observation_period` per person spanning their first visit start to
/// their last visit end.
pub struct ObservationPeriodTransform;

impl DomainTransform for ObservationPeriodTransform {
    fn name(&self) -> &'static str {
        OBSERVATION_PERIOD
    }

    fn source(&self) -> Option<SourceEntity> {
        None
    }

    fn targets(&self) -> &'static [&'static str] {
        &[OBSERVATION_PERIOD]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let (schema, visits) = read_target(ctx, VISIT_OCCURRENCE, VISIT_OCCURRENCE)?;
        let person_idx = column(&schema, "person_id")?;
        let start_idx = column(&schema, "visit_start_date")?;
        let end_idx = column(&schema, "visit_end_date")?;

        let mut report = TransformReport::new(self.name());
        let mut spans: BTreeMap<i64, (NaiveDate, NaiveDate)> = BTreeMap::new();
        for visit in &visits {
            report.rows_read += 1;
            let (Some(person_id), Some(first)) =
                (visit[person_idx].as_i64(), visit[start_idx].as_date())
            else {
                report.invalid_dates += 1;
                continue;
            };
            let last = visit[end_idx].as_date().unwrap_or(first).max(first);
            spans
                .entry(person_id)
                .and_modify(|(lo, hi)| {
                    *lo = (*lo).min(first);
                    *hi = (*hi).max(last);
                })
                .or_insert((first, last));
        }

        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            OBSERVATION_PERIOD,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;
        for (period_id, (person_id, (first, last))) in (1i64..).zip(spans) {
            writer.push(vec![
                Value::Int(period_id),
                Value::Int(person_id),
                Value::Date(first),
                Value::Date(last),
                Value::Int(EHR_TYPE_CONCEPT_ID),
            ])?;
        }

        report.written(OBSERVATION_PERIOD, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use cdm_model::Row;

    use super::*;
    use crate::domains::testing::context;
    use crate::schema::target_schema;

    fn visit(id: i64, person: i64, start: &str, end: Option<&str>) -> Row {
        let date = |value: &str| Value::Date(value.parse().unwrap());
        vec![
            Value::Int(id),
            Value::Int(person),
            Value::Int(9202),
            date(start),
            end.map_or(Value::Null, date),
            Value::Int(EHR_TYPE_CONCEPT_ID),
            Value::Null,
            Value::Null,
            Value::Null,
        ]
    }

    #[test]
    fn spans_first_to_last_visit() {
        let ctx = context();
        ctx.store
            .create_table(&target_schema(VISIT_OCCURRENCE).unwrap())
            .unwrap();
        ctx.store
            .insert_batch(
                VISIT_OCCURRENCE,
                &[
                    visit(1, 2, "2020-03-01", Some("2020-03-05")),
                    visit(2, 1, "2019-01-01", None),
                    visit(3, 2, "2018-06-01", Some("2018-06-02")),
                ],
            )
            .unwrap();

        let report = ObservationPeriodTransform.run(&ctx).unwrap();
        assert_eq!(report.rows_written, 2);
        let rows = ctx.store.scan(OBSERVATION_PERIOD).unwrap();
        assert_eq!(rows[0][1], Value::Int(1));
        assert_eq!(rows[0][2], rows[0][3]);
        assert_eq!(rows[1][1], Value::Int(2));
        assert_eq!(rows[1][2].as_date().unwrap().to_string(), "2018-06-01");
        assert_eq!(rows[1][3].as_date().unwrap().to_string(), "2020-03-05");
    }

    #[test]
    fn requires_visits() {
        let err = ObservationPeriodTransform.run(&context()).unwrap_err();
        assert!(err.is_precondition());
    }
}
