use std::time::Instant;

use cdm_map::gender_concept;
use cdm_model::{EntityKind, SourceEntity, Value};

use super::{key_cell, known_key, log_report};
use crate::context::TransformContext;
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::PROVIDER;
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Providers into `provider`, linked to their care site when known.
pub struct ProviderTransform;

impl DomainTransform for ProviderTransform {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(SourceEntity::Providers)
    }

    fn targets(&self) -> &'static [&'static str] {
        &[PROVIDER]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), SourceEntity::Providers)?;
        let mut report = TransformReport::new(self.name());
        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            PROVIDER,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;

        for row in staged.rows() {
            report.rows_read += 1;
            let id = row.get("Id");
            let Some(provider_id) = known_key(ctx, EntityKind::Provider, id)? else {
                report.orphan_rows += 1;
                continue;
            };
            writer.push(vec![
                Value::Int(provider_id),
                Value::non_empty_text(row.get("NAME")),
                Value::non_empty_text(row.get("SPECIALITY")),
                key_cell(ctx, EntityKind::Facility, row.get("ORGANIZATION"))?,
                Value::Int(gender_concept(row.get("GENDER"))),
                Value::text(id),
            ])?;
        }

        report.written(PROVIDER, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testing::{context, stage};

    #[test]
    fn links_provider_to_known_care_site() {
        let ctx = context();
        stage(
            &ctx,
            SourceEntity::Providers,
            &[
                &["dr-1", "org-1", "Ada", "F", "GENERAL PRACTICE"],
                &["dr-2", "org-unknown", "Bob", "M", ""],
            ],
        );
        ctx.keys.assign(EntityKind::Facility, "org-1").unwrap();
        ctx.keys.assign(EntityKind::Provider, "dr-1").unwrap();
        ctx.keys.assign(EntityKind::Provider, "dr-2").unwrap();

        let report = ProviderTransform.run(&ctx).unwrap();
        assert_eq!(report.rows_written, 2);
        let rows = ctx.store.scan(PROVIDER).unwrap();
        assert_eq!(rows[0][3], Value::Int(1));
        assert_eq!(rows[0][4], Value::Int(8532));
        assert_eq!(rows[1][3], Value::Null);
        assert_eq!(rows[1][2], Value::Null);
    }
}
