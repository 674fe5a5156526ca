//! Standard-vocabulary concept mapping types.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel concept id meaning "no matching standard concept found".
pub const UNMAPPED_CONCEPT_ID: i64 = 0;

/// Type concept for rows derived from an electronic health record.
pub const EHR_TYPE_CONCEPT_ID: i64 = 32817;

/// Target domain of a concept lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ConceptDomain {
    Condition,
    Drug,
    Procedure,
    Measurement,
    Observation,
    Visit,
    Gender,
    Race,
    Ethnicity,
}

impl ConceptDomain {
    /// Domain identifier as written in the vocabulary `domain_id` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Condition => "Condition",
            Self::Drug => "Drug",
            Self::Procedure => "Procedure",
            Self::Measurement => "Measurement",
            Self::Observation => "Observation",
            Self::Visit => "Visit",
            Self::Gender => "Gender",
            Self::Race => "Race",
            Self::Ethnicity => "Ethnicity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let all = [
            Self::Condition,
            Self::Drug,
            Self::Procedure,
            Self::Measurement,
            Self::Observation,
            Self::Visit,
            Self::Gender,
            Self::Race,
            Self::Ethnicity,
        ];
        all.into_iter()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for ConceptDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of mapping a source code into the standard vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapping {
    pub source_code: String,
    pub source_vocabulary: String,
    pub domain: ConceptDomain,
    /// Target concept, or [`UNMAPPED_CONCEPT_ID`].
    pub target_concept_id: i64,
    /// Vocabulary of the target concept; the source vocabulary when unmapped.
    pub target_vocabulary: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

impl ConceptMapping {
    pub fn unmapped(
        source_code: impl Into<String>,
        source_vocabulary: impl Into<String>,
        domain: ConceptDomain,
    ) -> Self {
        let source_vocabulary = source_vocabulary.into();
        Self {
            source_code: source_code.into(),
            target_vocabulary: source_vocabulary.clone(),
            source_vocabulary,
            domain,
            target_concept_id: UNMAPPED_CONCEPT_ID,
            valid_from: None,
            valid_to: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.target_concept_id != UNMAPPED_CONCEPT_ID
    }
}
