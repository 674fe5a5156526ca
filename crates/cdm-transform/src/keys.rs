//! Surrogate key bootstrap for the entities other tables refer to.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, warn};

use cdm_model::{EntityKind, SourceEntity};

use crate::context::TransformContext;
use crate::error::{Result, TransformError};
use crate::staged::StagedTable;

/// Staged entities whose `Id` column receives a surrogate key.
pub const KEYED_SOURCES: [(SourceEntity, EntityKind); 4] = [
    (SourceEntity::Patients, EntityKind::Subject),
    (SourceEntity::Encounters, EntityKind::Encounter),
    (SourceEntity::Organizations, EntityKind::Facility),
    (SourceEntity::Providers, EntityKind::Provider),
];

/// Outcome of [`bootstrap_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyBootstrapReport {
    /// Stored mappings per kind after the bootstrap.
    pub mappings: BTreeMap<EntityKind, u64>,
    /// Staged rows without an identifier.
    pub missing_ids: u64,
}

impl KeyBootstrapReport {
    pub fn total(&self) -> u64 {
        self.mappings.values().sum()
    }
}

/// Assigns keys to every identifier of the keyed staged tables.
///
/// Assignment is idempotent, so a bootstrap interrupted halfway can simply
/// run again.
pub fn bootstrap_keys(ctx: &TransformContext) -> Result<KeyBootstrapReport> {
    let span = info_span!("key_bootstrap");
    let _guard = span.enter();
    let start = Instant::now();
    let mut report = KeyBootstrapReport::default();

    for (entity, kind) in KEYED_SOURCES {
        let staged = StagedTable::read(ctx.store.as_ref(), entity)?;
        let mut ids = Vec::with_capacity(staged.len());
        for row in staged.rows() {
            match row.optional("Id") {
                Some(id) => ids.push(id.to_string()),
                None => report.missing_ids += 1,
            }
        }
        let mut assigned = 0u64;
        for chunk in ids.chunks(ctx.batch_size.max(1)) {
            if ctx.cancel.is_cancelled() {
                return Err(TransformError::Cancelled {
                    transform: "key_bootstrap",
                    written: assigned,
                });
            }
            ctx.keys.assign_many(kind, chunk)?;
            assigned += chunk.len() as u64;
        }

        let audit = ctx.keys.audit(kind)?;
        if !audit.is_consistent() {
            warn!(
                %kind,
                mappings = audit.mappings,
                counter = audit.counter,
                "key counter and mapping table disagree"
            );
        }
        info!(%kind, ids = ids.len(), mappings = audit.mappings, "assigned keys");
        report.mappings.insert(kind, audit.mappings);
    }

    info!(
        mappings = report.total(),
        missing_ids = report.missing_ids,
        duration_ms = start.elapsed().as_millis(),
        "key bootstrap complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::testing::{context, stage};

    fn stage_all(ctx: &TransformContext) {
        stage(
            ctx,
            SourceEntity::Patients,
            &[
                &["p1", "1980-01-01", "", "", "", "F"],
                &["p2", "1980-01-01", "", "", "", "M"],
                &["p1", "1980-01-01", "", "", "", "F"],
                &["", "1980-01-01", "", "", "", "M"],
            ],
        );
        stage(
            ctx,
            SourceEntity::Encounters,
            &[&["e1", "2020-01-01", "", "p1", "", "", "wellness", "", ""]],
        );
        stage(ctx, SourceEntity::Organizations, &[]);
        stage(ctx, SourceEntity::Providers, &[]);
    }

    #[test]
    fn assigns_distinct_ids_once() {
        let ctx = context();
        stage_all(&ctx);
        let report = bootstrap_keys(&ctx).unwrap();
        assert_eq!(report.mappings[&EntityKind::Subject], 2);
        assert_eq!(report.mappings[&EntityKind::Encounter], 1);
        assert_eq!(report.mappings[&EntityKind::Provider], 0);
        assert_eq!(report.missing_ids, 1);

        let again = bootstrap_keys(&ctx).unwrap();
        assert_eq!(again.mappings, report.mappings);
        assert!(ctx.keys.audit(EntityKind::Subject).unwrap().is_consistent());
    }

    #[test]
    fn cancelled_bootstrap_stops() {
        let ctx = context();
        stage_all(&ctx);
        ctx.cancel.cancel();
        assert!(matches!(
            bootstrap_keys(&ctx),
            Err(TransformError::Cancelled { .. })
        ));
    }
}
