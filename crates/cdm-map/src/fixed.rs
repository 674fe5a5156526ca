//! Fixed code tables for demographic and visit attributes.
//!
//! These attributes use a handful of generator-specific codes, so they are
//! resolved from constant tables instead of the vocabulary catalog. Unknown
//! codes resolve to the unmapped sentinel.

use cdm_model::UNMAPPED_CONCEPT_ID;

pub const MALE: i64 = 8507;
pub const FEMALE: i64 = 8532;

pub const RACE_WHITE: i64 = 8527;
pub const RACE_BLACK: i64 = 8516;
pub const RACE_ASIAN: i64 = 8515;
pub const RACE_NATIVE: i64 = 8657;

pub const HISPANIC: i64 = 38003563;
pub const NOT_HISPANIC: i64 = 38003564;

pub const INPATIENT_VISIT: i64 = 9201;
pub const OUTPATIENT_VISIT: i64 = 9202;
pub const EMERGENCY_VISIT: i64 = 9203;

pub fn gender_concept(code: &str) -> i64 {
    match code.trim().to_ascii_uppercase().as_str() {
        "M" => MALE,
        "F" => FEMALE,
        _ => UNMAPPED_CONCEPT_ID,
    }
}

pub fn race_concept(code: &str) -> i64 {
    match code.trim().to_ascii_lowercase().as_str() {
        "white" => RACE_WHITE,
        "black" => RACE_BLACK,
        "asian" => RACE_ASIAN,
        "native" => RACE_NATIVE,
        _ => UNMAPPED_CONCEPT_ID,
    }
}

pub fn ethnicity_concept(code: &str) -> i64 {
    match code.trim().to_ascii_lowercase().as_str() {
        "hispanic" => HISPANIC,
        "nonhispanic" => NOT_HISPANIC,
        _ => UNMAPPED_CONCEPT_ID,
    }
}

/// Visit concept for an encounter class.
pub fn visit_concept(encounter_class: &str) -> i64 {
    match encounter_class.trim().to_ascii_lowercase().as_str() {
        "inpatient" => INPATIENT_VISIT,
        "ambulatory" | "outpatient" | "wellness" | "home" | "virtual" => OUTPATIENT_VISIT,
        "emergency" | "urgentcare" => EMERGENCY_VISIT,
        _ => UNMAPPED_CONCEPT_ID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demographics() {
        assert_eq!(gender_concept("M"), MALE);
        assert_eq!(gender_concept(" f "), FEMALE);
        assert_eq!(gender_concept("X"), UNMAPPED_CONCEPT_ID);
        assert_eq!(race_concept("Asian"), RACE_ASIAN);
        assert_eq!(race_concept("other"), UNMAPPED_CONCEPT_ID);
        assert_eq!(ethnicity_concept("nonhispanic"), NOT_HISPANIC);
    }

    #[test]
    fn encounter_classes() {
        assert_eq!(visit_concept("inpatient"), INPATIENT_VISIT);
        assert_eq!(visit_concept("wellness"), OUTPATIENT_VISIT);
        assert_eq!(visit_concept("urgentcare"), EMERGENCY_VISIT);
        assert_eq!(visit_concept("snf"), UNMAPPED_CONCEPT_ID);
    }
}
