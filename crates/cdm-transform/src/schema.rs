//! Normalized target table definitions.

use cdm_model::{ColumnDef, ColumnType, TableSchema};

pub const PERSON: &str = "person";
pub const CARE_SITE: &str = "care_site";
pub const PROVIDER: &str = "provider";
pub const VISIT_OCCURRENCE: &str = "visit_occurrence";
pub const CONDITION_OCCURRENCE: &str = "condition_occurrence";
pub const DRUG_EXPOSURE: &str = "drug_exposure";
pub const PROCEDURE_OCCURRENCE: &str = "procedure_occurrence";
pub const MEASUREMENT: &str = "measurement";
pub const OBSERVATION: &str = "observation";
pub const OBSERVATION_PERIOD: &str = "observation_period";

/// Every normalized table, in build order.
pub const TARGET_TABLES: [&str; 10] = [
    PERSON,
    CARE_SITE,
    PROVIDER,
    VISIT_OCCURRENCE,
    CONDITION_OCCURRENCE,
    DRUG_EXPOSURE,
    PROCEDURE_OCCURRENCE,
    MEASUREMENT,
    OBSERVATION,
    OBSERVATION_PERIOD,
];

fn int(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Integer)
}

fn date(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Date)
}

fn text(name: &str) -> ColumnDef {
    ColumnDef::text(name)
}

/// Schema of a target table, `None` for unknown names.
pub fn target_schema(table: &str) -> Option<TableSchema> {
    let columns = match table {
        PERSON => vec![
            int("person_id"),
            int("gender_concept_id"),
            int("year_of_birth"),
            int("month_of_birth"),
            int("day_of_birth"),
            date("birth_date"),
            date("death_date"),
            int("race_concept_id"),
            int("ethnicity_concept_id"),
            text("person_source_value"),
            text("gender_source_value"),
            text("race_source_value"),
            text("ethnicity_source_value"),
        ],
        CARE_SITE => vec![
            int("care_site_id"),
            text("care_site_name"),
            text("address"),
            text("city"),
            text("state"),
            text("zip"),
            text("care_site_source_value"),
        ],
        PROVIDER => vec![
            int("provider_id"),
            text("provider_name"),
            text("specialty_source_value"),
            int("care_site_id"),
            int("gender_concept_id"),
            text("provider_source_value"),
        ],
        VISIT_OCCURRENCE => vec![
            int("visit_occurrence_id"),
            int("person_id"),
            int("visit_concept_id"),
            date("visit_start_date"),
            date("visit_end_date"),
            int("visit_type_concept_id"),
            int("provider_id"),
            int("care_site_id"),
            text("visit_source_value"),
        ],
        CONDITION_OCCURRENCE => event_columns("condition_occurrence_id", "condition"),
        DRUG_EXPOSURE => event_columns("drug_exposure_id", "drug"),
        PROCEDURE_OCCURRENCE => event_columns("procedure_occurrence_id", "procedure"),
        MEASUREMENT => vec![
            int("measurement_id"),
            int("person_id"),
            int("measurement_concept_id"),
            date("measurement_date"),
            int("measurement_type_concept_id"),
            ColumnDef::new("value_as_number", ColumnType::Real),
            text("unit_source_value"),
            int("visit_occurrence_id"),
            text("measurement_source_value"),
            text("value_source_value"),
        ],
        OBSERVATION => vec![
            int("observation_id"),
            int("person_id"),
            int("observation_concept_id"),
            date("observation_date"),
            int("observation_type_concept_id"),
            text("value_as_string"),
            text("unit_source_value"),
            int("visit_occurrence_id"),
            text("observation_source_value"),
        ],
        OBSERVATION_PERIOD => vec![
            int("observation_period_id"),
            int("person_id"),
            date("observation_period_start_date"),
            date("observation_period_end_date"),
            int("period_type_concept_id"),
        ],
        _ => return None,
    };
    Some(TableSchema::new(table, columns))
}

/// Shared layout of condition, drug and procedure tables.
fn event_columns(id: &str, prefix: &str) -> Vec<ColumnDef> {
    vec![
        int(id),
        int("person_id"),
        int(&format!("{prefix}_concept_id")),
        date(&format!("{prefix}_start_date")),
        date(&format!("{prefix}_end_date")),
        int(&format!("{prefix}_type_concept_id")),
        int("visit_occurrence_id"),
        text(&format!("{prefix}_source_value")),
    ]
}

/// Column holding the person key, for tables that have one.
pub fn person_column(table: &str) -> Option<&'static str> {
    match table {
        PERSON | VISIT_OCCURRENCE | CONDITION_OCCURRENCE | DRUG_EXPOSURE
        | PROCEDURE_OCCURRENCE | MEASUREMENT | OBSERVATION | OBSERVATION_PERIOD => {
            Some("person_id")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_target_has_a_schema() {
        for table in TARGET_TABLES {
            let schema = target_schema(table).unwrap();
            assert_eq!(schema.name, table);
            assert!(schema.arity() > 0);
        }
        assert!(target_schema("stg_patients").is_none());
    }

    #[test]
    fn event_tables_share_layout() {
        let schema = target_schema(DRUG_EXPOSURE).unwrap();
        assert_eq!(schema.position("drug_concept_id"), Some(2));
        assert_eq!(schema.position("visit_occurrence_id"), Some(6));
    }
}
