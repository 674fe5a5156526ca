//! Key and concept mapping for the CDM pipeline.
//!
//! - [`KeyMapper`] turns external string identifiers into stable integer keys.
//! - [`ConceptCatalog`] maps source codes into standard concepts.
//! - [`classify_observation`] splits observation values into numeric and
//!   non-numeric classes.

pub mod classify;
pub mod concept;
pub mod error;
pub mod fixed;
pub mod keys;
pub mod report;

pub use classify::{classify_observation, normalize_lenient, parse_strict_decimal, reclassify_value};
pub use concept::{ConceptCatalog, ConceptRow, LOINC, RXNORM, SNOMED};
pub use error::{MapError, Result};
pub use fixed::{ethnicity_concept, gender_concept, race_concept, visit_concept};
pub use keys::{KeyAudit, KeyMapper};
pub use report::{CoverageEntry, UnmappedReport};
