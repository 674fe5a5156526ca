//! Standard-vocabulary concept lookup.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use tracing::info;

use cdm_model::{ConceptDomain, ConceptMapping};

use crate::error::{MapError, Result};

/// Source vocabularies used by the Synthea extracts.
pub const SNOMED: &str = "SNOMED";
pub const RXNORM: &str = "RxNorm";
pub const LOINC: &str = "LOINC";

/// One row of an Athena-style `CONCEPT.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptRow {
    pub concept_id: i64,
    pub concept_name: String,
    pub domain_id: String,
    pub vocabulary_id: String,
    pub standard: bool,
    pub concept_code: String,
    pub valid_start: Option<NaiveDate>,
    pub valid_end: Option<NaiveDate>,
    pub invalid_reason: Option<String>,
}

impl ConceptRow {
    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }

    /// Ordering used to pick one row among several matches: valid rows
    /// first, then standard rows, then the lowest concept id.
    fn preference(&self) -> (bool, bool, i64) {
        (!self.is_valid(), !self.standard, self.concept_id)
    }
}

/// In-memory concept table indexed by (vocabulary, code).
#[derive(Debug, Clone, Default)]
pub struct ConceptCatalog {
    index: HashMap<(String, String), Vec<ConceptRow>>,
    rows: usize,
}

impl ConceptCatalog {
    /// A catalog without concepts; every lookup is unmapped.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ConceptRow>) -> Self {
        let mut catalog = Self::default();
        for row in rows {
            catalog.insert(row);
        }
        catalog
    }

    /// Loads a tab-separated Athena `CONCEPT.csv`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| vocabulary_read(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| vocabulary_read(path, e))?
            .clone();
        let position = |column: &'static str| {
            headers
                .iter()
                .position(|name| name.trim().eq_ignore_ascii_case(column))
                .ok_or_else(|| MapError::VocabularyColumn {
                    path: path.to_path_buf(),
                    column,
                })
        };
        let concept_id = position("concept_id")?;
        let concept_name = position("concept_name")?;
        let domain_id = position("domain_id")?;
        let vocabulary_id = position("vocabulary_id")?;
        let standard_concept = position("standard_concept")?;
        let concept_code = position("concept_code")?;
        let valid_start = position("valid_start_date")?;
        let valid_end = position("valid_end_date")?;
        let invalid_reason = position("invalid_reason")?;

        let mut catalog = Self::default();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record.map_err(|e| vocabulary_read(path, e))?;
            let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
            let Ok(id) = field(concept_id).parse::<i64>() else {
                skipped += 1;
                continue;
            };
            catalog.insert(ConceptRow {
                concept_id: id,
                concept_name: field(concept_name).to_string(),
                domain_id: field(domain_id).to_string(),
                vocabulary_id: field(vocabulary_id).to_string(),
                standard: field(standard_concept).eq_ignore_ascii_case("S"),
                concept_code: field(concept_code).to_string(),
                valid_start: parse_athena_date(field(valid_start)),
                valid_end: parse_athena_date(field(valid_end)),
                invalid_reason: Some(field(invalid_reason))
                    .filter(|reason| !reason.is_empty())
                    .map(str::to_string),
            });
        }
        info!(
            path = %path.display(),
            concepts = catalog.rows,
            skipped,
            "loaded concept vocabulary"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    fn insert(&mut self, row: ConceptRow) {
        let key = (
            row.vocabulary_id.to_ascii_uppercase(),
            row.concept_code.clone(),
        );
        self.index.entry(key).or_default().push(row);
        self.rows += 1;
    }

    /// Maps a source code into `domain`.
    ///
    /// Matches exactly on code, vocabulary (case-insensitive) and domain.
    /// When several rows match, valid rows beat invalid ones, standard rows
    /// beat non-standard ones, and the lowest concept id wins. No match
    /// yields the unmapped sentinel with the source vocabulary kept.
    pub fn map_concept(
        &self,
        code: &str,
        vocabulary: &str,
        domain: ConceptDomain,
    ) -> ConceptMapping {
        let code = code.trim();
        let key = (vocabulary.trim().to_ascii_uppercase(), code.to_string());
        let best = self.index.get(&key).and_then(|rows| {
            rows.iter()
                .filter(|row| row.domain_id.eq_ignore_ascii_case(domain.as_str()))
                .min_by_key(|row| row.preference())
        });
        match best {
            Some(row) => ConceptMapping {
                source_code: code.to_string(),
                source_vocabulary: vocabulary.to_string(),
                domain,
                target_concept_id: row.concept_id,
                target_vocabulary: row.vocabulary_id.clone(),
                valid_from: row.valid_start,
                valid_to: row.valid_end,
            },
            None => ConceptMapping::unmapped(code, vocabulary, domain),
        }
    }
}

fn vocabulary_read(path: &Path, source: csv::Error) -> MapError {
    MapError::VocabularyRead {
        path: path.to_path_buf(),
        source,
    }
}

/// Parses Athena `YYYYMMDD` dates, also accepting ISO `YYYY-MM-DD`.
fn parse_athena_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use cdm_model::UNMAPPED_CONCEPT_ID;
    use tempfile::tempdir;

    use super::*;

    fn row(id: i64, domain: &str, standard: bool, invalid: Option<&str>) -> ConceptRow {
        ConceptRow {
            concept_id: id,
            concept_name: format!("concept {id}"),
            domain_id: domain.to_string(),
            vocabulary_id: SNOMED.to_string(),
            standard,
            concept_code: "44054006".to_string(),
            valid_start: None,
            valid_end: None,
            invalid_reason: invalid.map(str::to_string),
        }
    }

    #[test]
    fn unknown_code_maps_to_sentinel() {
        let catalog = ConceptCatalog::empty();
        let mapping = catalog.map_concept("123", SNOMED, ConceptDomain::Condition);
        assert_eq!(mapping.target_concept_id, UNMAPPED_CONCEPT_ID);
        assert_eq!(mapping.target_vocabulary, SNOMED);
        assert_eq!(mapping.source_code, "123");
    }

    #[test]
    fn domain_filter_applies() {
        let catalog = ConceptCatalog::from_rows([row(201826, "Condition", true, None)]);
        assert!(
            !catalog
                .map_concept("44054006", SNOMED, ConceptDomain::Procedure)
                .is_mapped()
        );
        assert_eq!(
            catalog
                .map_concept("44054006", "snomed", ConceptDomain::Condition)
                .target_concept_id,
            201826
        );
    }

    #[test]
    fn tie_break_prefers_valid_standard_then_lowest_id() {
        let catalog = ConceptCatalog::from_rows([
            row(10, "Condition", false, None),
            row(30, "Condition", true, None),
            row(20, "Condition", true, None),
            row(5, "Condition", true, Some("U")),
        ]);
        let mapping = catalog.map_concept("44054006", SNOMED, ConceptDomain::Condition);
        assert_eq!(mapping.target_concept_id, 20);
    }

    #[test]
    fn loads_athena_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CONCEPT.csv");
        fs::write(
            &path,
            "concept_id\tconcept_name\tdomain_id\tvocabulary_id\tconcept_class_id\tstandard_concept\tconcept_code\tvalid_start_date\tvalid_end_date\tinvalid_reason\n\
             3004249\tSystolic \"blood\" pressure\tMeasurement\tLOINC\tLab Test\tS\t8480-6\t19700101\t20991231\t\n\
             bad\tx\tMeasurement\tLOINC\tLab Test\tS\t1-1\t19700101\t20991231\t\n",
        )
        .unwrap();
        let catalog = ConceptCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        let mapping = catalog.map_concept("8480-6", LOINC, ConceptDomain::Measurement);
        assert_eq!(mapping.target_concept_id, 3004249);
        assert_eq!(mapping.valid_from, NaiveDate::from_ymd_opt(1970, 1, 1));
    }
}
