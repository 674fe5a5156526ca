use std::time::Instant;

use cdm_model::{EntityKind, SourceEntity, Value};

use super::{known_key, log_report};
use crate::context::TransformContext;
use crate::domain::DomainTransform;
use crate::error::Result;
use crate::report::TransformReport;
use crate::schema::CARE_SITE;
use crate::staged::StagedTable;
use crate::writer::TableWriter;

/// Organizations into `care_site`.
pub struct CareSiteTransform;

impl DomainTransform for CareSiteTransform {
    fn name(&self) -> &'static str {
        CARE_SITE
    }

    fn source(&self) -> Option<SourceEntity> {
        Some(SourceEntity::Organizations)
    }

    fn targets(&self) -> &'static [&'static str] {
        &[CARE_SITE]
    }

    fn run(&self, ctx: &TransformContext) -> Result<TransformReport> {
        let start = Instant::now();
        let staged = StagedTable::read(ctx.store.as_ref(), SourceEntity::Organizations)?;
        let mut report = TransformReport::new(self.name());
        let mut writer = TableWriter::create(
            ctx.store.as_ref(),
            CARE_SITE,
            self.name(),
            ctx.batch_size,
            &ctx.cancel,
        )?;

        for row in staged.rows() {
            report.rows_read += 1;
            let id = row.get("Id");
            let Some(care_site_id) = known_key(ctx, EntityKind::Facility, id)? else {
                report.orphan_rows += 1;
                continue;
            };
            writer.push(vec![
                Value::Int(care_site_id),
                Value::non_empty_text(row.get("NAME")),
                Value::non_empty_text(row.get("ADDRESS")),
                Value::non_empty_text(row.get("CITY")),
                Value::non_empty_text(row.get("STATE")),
                Value::non_empty_text(row.get("ZIP")),
                Value::text(id),
            ])?;
        }

        report.written(CARE_SITE, writer.finish()?);
        log_report(&report, start);
        Ok(report)
    }
}
