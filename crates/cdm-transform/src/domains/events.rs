use std::time::Instant;

use cdm_map::{RXNORM, SNOMED};
use cdm_model::{ConceptDomain, EHR_TYPE_CONCEPT_ID, EntityKind, SourceEntity, Value};

use super::{key_cell, known_key, log_report};
use crate::context::TransformContext;
use crate::dates::{DateField, parse_date};
use crate::domain::DomainTransform;
use crate::error::{Result, TransformError};
use crate::report::TransformReport;
use crate::schema::{CONDITION_OCCURRENCE, DRUG_EXPOSURE, PROCEDURE_OCCURRENCE};
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Coded clinical events (conditions, medications, procedures).
///
/// Every row gets a fresh id from the `<table>_id` store counter and a
/// concept from the catalog; the source code is kept verbatim.
pub struct EventTransform {
    source: SourceEntity,
    table: &'static str,
    targets: &'static [&'static str],
    vocabulary: &'static str,
    domain: ConceptDomain,
}

impl EventTransform {
    pub fn conditions() -> Self {
        Self {
            source: SourceEntity::Conditions,
            table: CONDITION_OCCURRENCE,
            targets: &[CONDITION_OCCURRENCE],
            vocabulary: SNOMED,
            domain: ConceptDomain::Condition,
        }
    }

    pub fn drugs() -> Self {
        Self {
            source: SourceEntity::Medications,
            table: DRUG_EXPOSURE,
            targets: &[DRUG_EXPOSURE],
            vocabulary: RXNORM,
            domain: ConceptDomain::Drug,
        }
    }

    pub fn procedures() -> Self {
        Self {
            source: SourceEntity::Procedures,
            table: PROCEDURE_OCCURRENCE,
            targets: &[PROCEDURE_OCCURRENCE],
            vocabulary: SNOMED,
            domain: ConceptDomain::Procedure,
        }
    }

    fn counter(&self) -> String {
        format!("{}_id", self.table)
    }
}

impl DomainTransform for EventTransform {
    fn name(&self) -> &'static str {
        self.table
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(self.source)
    }

    fn targets(&self) -> &'static [&'static str] {
        self.targets
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), self.source)?;
        let mut report = TransformReport::new(self.name());
        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            self.table,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;
        let counter = self.counter();

        for row in staged.rows() {
            report.rows_read += 1;
            let Some(person_id) = known_key(ctx, EntityKind::Subject, row.get("PATIENT"))? else {
                report.orphan_rows += 1;
                continue;
            };
            let Some(event_start) = parse_date(row.get("START")) else {
                report.invalid_dates += 1;
                continue;
            };
            let event_end = match DateField::read(row.get("STOP")) {
                DateField::Invalid => {
                    report.invalid_dates += 1;
                    None
                }
                field => field.date(),
            };
            let code = row.get("CODE");
            let mapping = ctx.catalog.map_concept(code, self.vocabulary, self.domain);
            if !mapping.is_mapped() {
                report.unmapped += 1;
            }
            let id = ctx
                .store
                .next_value(&counter)
                .map_err(|e| TransformError::store(self.table, e))?;
            writer.push(vec![
                Value::Int(id),
                Value::Int(person_id),
                Value::Int(mapping.target_concept_id),
                Value::Date(event_start),
                event_end.into(),
                Value::Int(EHR_TYPE_CONCEPT_ID),
                key_cell(ctx, EntityKind::Encounter, row.get("ENCOUNTER"))?,
                Value::non_empty_text(code),
            ])?;
        }

        report.written(self.table, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cdm_map::{ConceptCatalog, ConceptRow};

    use super::*;
    use crate::domains::testing::{context, stage};

    fn diabetes() -> ConceptRow {
        ConceptRow {
            concept_id: 201826,
            concept_name: "Type 2 diabetes mellitus".to_string(),
            domain_id: "Condition".to_string(),
            vocabulary_id: SNOMED.to_string(),
            standard: true,
            concept_code: "44054006".to_string(),
            valid_start: None,
            valid_end: None,
            invalid_reason: None,
        }
    }

    #[test]
    fn maps_concepts_and_counts_unmapped() {
        let ctx = context().with_catalog(Arc::new(ConceptCatalog::from_rows([diabetes()])));
        stage(
            &ctx,
            SourceEntity::Conditions,
            &[
                &["2019-03-01", "", "p1", "e1", "44054006", "Diabetes"],
                &["2019-04-01", "2019-05-01", "p1", "", "999", "Unknown"],
                &["2019-04-01", "", "stranger", "", "44054006", "Diabetes"],
            ],
        );
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();
        ctx.keys.assign(EntityKind::Encounter, "e1").unwrap();

        let transform = EventTransform::conditions();
        let report = transform.run(&ctx).unwrap();
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.unmapped, 1);
        assert_eq!(report.orphan_rows, 1);

        let rows = ctx.store.scan(CONDITION_OCCURRENCE).unwrap();
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[0][2], Value::Int(201826));
        assert_eq!(rows[0][6], Value::Int(1));
        assert_eq!(rows[1][0], Value::Int(2));
        assert_eq!(rows[1][2], Value::Int(0));
        assert_eq!(rows[1][7], Value::text("999"));
    }

    #[test]
    fn rerun_rewrites_the_table() {
        let ctx = context();
        stage(
            &ctx,
            SourceEntity::Medications,
            &[&["2019-03-01", "", "p1", "", "313782", "Acetaminophen"]],
        );
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();
        let transform = EventTransform::drugs();
        transform.run(&ctx).unwrap();
        transform.run(&ctx).unwrap();
        assert_eq!(ctx.store.count(DRUG_EXPOSURE).unwrap(), 1);
    }
}
