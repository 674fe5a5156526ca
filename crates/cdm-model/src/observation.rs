//! Numeric / non-numeric classification of clinical observations.

use serde::{Deserialize, Serialize};

/// Class an observation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationClass {
    Numeric,
    NonNumeric,
}

/// Classified value of a recorded observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ObservationValue {
    Numeric { value: f64 },
    NonNumeric { text: String },
}

impl ObservationValue {
    pub fn class(&self) -> ObservationClass {
        match self {
            Self::Numeric { .. } => ObservationClass::Numeric,
            Self::NonNumeric { .. } => ObservationClass::NonNumeric,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric { value } => Some(*value),
            Self::NonNumeric { .. } => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Numeric { .. } => None,
            Self::NonNumeric { text } => Some(text),
        }
    }
}

/// A clinical observation together with its classified value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedObservation {
    pub subject_key: String,
    pub encounter_key: Option<String>,
    pub code: String,
    pub recorded_on: String,
    pub units: Option<String>,
    pub value: ObservationValue,
}

impl ClassifiedObservation {
    pub fn class(&self) -> ObservationClass {
        self.value.class()
    }
}
