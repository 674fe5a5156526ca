//! Transforms for each normalized domain.

mod care_site;
mod events;
mod observations;
mod period;
mod person;
mod provider;
mod reclassify;
mod visit;

use std::time::Instant;

use tracing::info;

use cdm_model::{EntityKind, Row, TableSchema, Value};

use crate::context::TransformContext;
use crate::error::{Result, TransformError};
use crate::report::TransformReport;

pub use care_site::CareSiteTransform;
pub use events::EventTransform;
pub use observations::{ObservationTransform, observation_external_key};
pub use period::ObservationPeriodTransform;
pub use person::PersonTransform;
pub use provider::ProviderTransform;
pub use reclassify::ReclassifyTransform;
pub use visit::VisitTransform;

/// Internal key of an already-mapped entity; `None` for empty or unknown
/// identifiers.
pub(crate) fn known_key(
    ctx: &TransformContext,
    kind: EntityKind,
    external: &str,
) -> Result<Option<i64>> {
    if external.is_empty() {
        return Ok(None);
    }
    Ok(ctx.keys.lookup(kind, external)?)
}

/// [`known_key`] as a nullable cell.
pub(crate) fn key_cell(ctx: &TransformContext, kind: EntityKind, external: &str) -> Result<Value> {
    Ok(known_key(ctx, kind, external)?.into())
}

/// Reads every row of a normalized table built by an earlier stage.
pub(crate) fn read_target(
    ctx: &TransformContext,
    table: &'static str,
    stage: &'static str,
) -> Result<(TableSchema, Vec<Row>)> {
    let schema = ctx
        .store
        .table_schema(table)
        .map_err(|e| TransformError::store(table, e))?
        .ok_or(TransformError::MissingTarget {
            table: table.to_string(),
            stage,
        })?;
    let rows = ctx
        .store
        .scan(table)
        .map_err(|e| TransformError::store(table, e))?;
    Ok((schema, rows))
}

/// Position of `column` in `schema`, or a missing-column error.
pub(crate) fn column(schema: &TableSchema, column: &str) -> Result<usize> {
    schema
        .position(column)
        .ok_or_else(|| TransformError::MissingColumn {
            table: schema.name.clone(),
            column: column.to_string(),
        })
}

pub(crate) fn log_report(report: &TransformReport, start: Instant) {
    info!(
        transform = report.transform,
        rows_read = report.rows_read,
        rows_written = report.rows_written,
        orphan_rows = report.orphan_rows,
        invalid_dates = report.invalid_dates,
        unmapped = report.unmapped,
        duration_ms = start.elapsed().as_millis(),
        "transform complete"
    );
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use cdm_model::{SourceEntity, TableSchema, Value};
    use cdm_store::{MemoryStore, Store};

    use crate::context::TransformContext;

    /// Stages `rows` (raw text, empty meaning null) under `entity`'s
    /// default columns.
    pub fn stage(ctx: &TransformContext, entity: SourceEntity, rows: &[&[&str]]) {
        let header: Vec<String> = entity.columns().iter().map(|c| (*c).to_string()).collect();
        let table = entity.staging_table();
        ctx.store
            .create_table(&TableSchema::staging(&table, &header))
            .unwrap();
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            Value::Null
                        } else {
                            Value::text(*cell)
                        }
                    })
                    .collect()
            })
            .collect();
        ctx.store.insert_batch(&table, &rows).unwrap();
    }

    pub fn context() -> TransformContext {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        TransformContext::new(store).with_batch_size(2)
    }
}
