//! Post-load validation: table counts, concept coverage, referential
//! integrity and key consistency.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};

use cdm_map::{KeyAudit, LOINC, RXNORM, SNOMED, UnmappedReport};
use cdm_model::{
    ConceptDomain, EntityKind, PipelineConfig, Row, SourceEntity, UNMAPPED_CONCEPT_ID,
};

use crate::context::TransformContext;
use crate::error::{Result, TransformError};
use crate::schema::{
    CONDITION_OCCURRENCE, DRUG_EXPOSURE, MEASUREMENT, OBSERVATION, PERSON, PROCEDURE_OCCURRENCE,
    TARGET_TABLES, person_column,
};

/// File name of the report inside the processed directory.
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";

/// Concept column, source vocabulary and domain of each coded table.
const CODED_TABLES: [(&str, &str, &str, ConceptDomain); 5] = [
    (CONDITION_OCCURRENCE, "condition_concept_id", SNOMED, ConceptDomain::Condition),
    (DRUG_EXPOSURE, "drug_concept_id", RXNORM, ConceptDomain::Drug),
    (PROCEDURE_OCCURRENCE, "procedure_concept_id", SNOMED, ConceptDomain::Procedure),
    (MEASUREMENT, "measurement_concept_id", LOINC, ConceptDomain::Measurement),
    (OBSERVATION, "observation_concept_id", LOINC, ConceptDomain::Observation),
];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    /// Configuration of the run that produced the tables.
    pub config: Option<PipelineConfig>,
    pub staged_tables: BTreeMap<String, u64>,
    pub target_tables: BTreeMap<String, u64>,
    /// Unmapped percentage by (vocabulary, domain).
    pub concept_coverage: UnmappedReport,
    /// Rows whose `person_id` has no `person` row, per table.
    pub orphan_rows: BTreeMap<String, u64>,
    pub key_audits: Vec<KeyAudit>,
    pub checked_rows: u64,
}

impl ValidationReport {
    /// Whether referential integrity and key consistency hold.
    pub fn is_clean(&self) -> bool {
        self.orphan_rows.values().all(|count| *count == 0)
            && self.key_audits.iter().all(KeyAudit::is_consistent)
    }
}

/// Inspects every staged and normalized table.
pub fn validate(ctx: &TransformContext) -> Result<ValidationReport> {
    let span = info_span!("validate");
    let _guard = span.enter();
    let start = Instant::now();
    let store = ctx.store.as_ref();
    let count = |table: &str| {
        store
            .count(table)
            .map_err(|e| TransformError::store(table, e))
    };

    let mut staged_tables = BTreeMap::new();
    for entity in SourceEntity::ALL {
        let table = entity.staging_table();
        let rows = count(table.as_str())?;
        staged_tables.insert(table, rows);
    }
    let mut target_tables = BTreeMap::new();
    for table in TARGET_TABLES {
        target_tables.insert(table.to_string(), count(table)?);
    }

    let mut concept_coverage = UnmappedReport::new();
    for (table, concept_column, vocabulary, domain) in CODED_TABLES {
        let Some((idx, rows)) = scan_column(ctx, table, concept_column)? else {
            continue;
        };
        let unmapped = rows
            .iter()
            .filter(|row| row[idx].as_i64().unwrap_or(UNMAPPED_CONCEPT_ID) == UNMAPPED_CONCEPT_ID)
            .count();
        concept_coverage.add(vocabulary, domain, rows.len() as u64, unmapped as u64);
    }

    let persons: HashSet<i64> = match scan_column(ctx, PERSON, "person_id")? {
        Some((idx, rows)) => rows.iter().filter_map(|row| row[idx].as_i64()).collect(),
        None => HashSet::new(),
    };
    let mut orphan_rows = BTreeMap::new();
    for table in TARGET_TABLES.into_iter().filter(|table| *table != PERSON) {
        let Some(column) = person_column(table) else {
            continue;
        };
        let Some((idx, rows)) = scan_column(ctx, table, column)? else {
            continue;
        };
        let orphans = rows
            .iter()
            .filter(|row| row[idx].as_i64().is_none_or(|id| !persons.contains(&id)))
            .count() as u64;
        if orphans > 0 {
            warn!(table, orphans, "rows reference unknown persons");
        }
        orphan_rows.insert(table.to_string(), orphans);
    }

    let key_audits = EntityKind::ALL
        .into_iter()
        .map(|kind| ctx.keys.audit(kind))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let checked_rows = target_tables.values().sum();
    let report = ValidationReport {
        generated_at: Utc::now(),
        config: None,
        staged_tables,
        target_tables,
        concept_coverage,
        orphan_rows,
        key_audits,
        checked_rows,
    };
    info!(
        checked_rows,
        unmapped = report.concept_coverage.total_unmapped(),
        clean = report.is_clean(),
        duration_ms = start.elapsed().as_millis(),
        "validation complete"
    );
    Ok(report)
}

/// Rows of `table` and the position of `column`; `None` when the table
/// has not been built.
fn scan_column(
    ctx: &TransformContext,
    table: &str,
    column: &str,
) -> Result<Option<(usize, Vec<Row>)>> {
    let Some(schema) = ctx
        .store
        .table_schema(table)
        .map_err(|e| TransformError::store(table, e))?
    else {
        return Ok(None);
    };
    let idx = schema
        .position(column)
        .ok_or_else(|| TransformError::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        })?;
    let rows = ctx
        .store
        .scan(table)
        .map_err(|e| TransformError::store(table, e))?;
    Ok(Some((idx, rows)))
}

/// Writes the report as pretty JSON, replacing `path` atomically.
pub fn write_report(report: &ValidationReport, path: &Path) -> Result<()> {
    let io_err = |source: std::io::Error| TransformError::Report {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    let temp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&temp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&temp, path).map_err(io_err)?;
    info!(path = %path.display(), "wrote validation report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use cdm_model::{TableSchema, Value};
    use tempfile::tempdir;

    use super::*;
    use crate::domains::testing::context;
    use crate::schema::target_schema;

    fn create(ctx: &TransformContext, table: &str, rows: &[Vec<Value>]) {
        ctx.store
            .create_table(&target_schema(table).unwrap())
            .unwrap();
        ctx.store.insert_batch(table, rows).unwrap();
    }

    fn condition(id: i64, person: i64, concept: i64) -> Vec<Value> {
        vec![
            Value::Int(id),
            Value::Int(person),
            Value::Int(concept),
            Value::Null,
            Value::Null,
            Value::Int(32817),
            Value::Null,
            Value::text("code"),
        ]
    }

    #[test]
    fn reports_coverage_and_orphans() {
        let ctx = context();
        ctx.store
            .create_table(&TableSchema::staging("stg_patients", &["Id".to_string()]))
            .unwrap();
        let mut person = vec![Value::Null; target_schema(PERSON).unwrap().arity()];
        person[0] = Value::Int(1);
        create(&ctx, PERSON, &[person]);
        create(
            &ctx,
            CONDITION_OCCURRENCE,
            &[condition(1, 1, 201826), condition(2, 1, 0), condition(3, 9, 0), condition(4, 1, 5)],
        );
        ctx.keys.assign(EntityKind::Subject, "p1").unwrap();

        let report = validate(&ctx).unwrap();
        assert_eq!(report.target_tables[CONDITION_OCCURRENCE], 4);
        assert_eq!(report.target_tables[MEASUREMENT], 0);
        assert_eq!(report.staged_tables["stg_patients"], 0);
        assert_eq!(report.orphan_rows[CONDITION_OCCURRENCE], 1);
        assert_eq!(report.checked_rows, 5);
        let coverage = report.concept_coverage.entries();
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].unmapped, 2);
        assert_eq!(coverage[0].unmapped_percent, 50.0);
        assert!(!report.is_clean());

        let dir = tempdir().unwrap();
        let path = dir.path().join(VALIDATION_REPORT_FILE);
        write_report(&report, &path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["checked_rows"], 5);
        assert_eq!(json["concept_coverage"][0]["vocabulary"], "SNOMED");
    }
}
