//! Numeric / non-numeric classification of observation values.

use cdm_model::ObservationValue;

/// Parses `raw` as a plain decimal: an optional sign, digits and at most one
/// decimal point. Whitespace, separators, exponents and named values such as
/// `NaN` are rejected.
pub fn parse_strict_decimal(raw: &str) -> Option<f64> {
    let body = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let mut digits = 0usize;
    let mut points = 0usize;
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits += 1,
            '.' => points += 1,
            _ => return None,
        }
    }
    if digits == 0 || points > 1 {
        return None;
    }
    raw.parse::<f64>().ok()
}

/// Classifies a recorded observation value.
///
/// Total and pure: every input yields exactly one class, and the same input
/// always yields the same class.
pub fn classify_observation(raw: &str) -> ObservationValue {
    match parse_strict_decimal(raw) {
        Some(value) => ObservationValue::Numeric { value },
        None => ObservationValue::NonNumeric {
            text: raw.to_string(),
        },
    }
}

/// Normalization applied only by the re-classification maintenance pass:
/// surrounding whitespace is trimmed and thousands separators removed.
pub fn normalize_lenient(raw: &str) -> String {
    raw.trim().chars().filter(|ch| *ch != ',').collect()
}

/// Numeric value of a previously non-numeric text that parses strictly once
/// leniently normalized, e.g. `" 1,200 "`.
pub fn reclassify_value(text: &str) -> Option<f64> {
    if parse_strict_decimal(text).is_some() {
        return None;
    }
    parse_strict_decimal(&normalize_lenient(text))
}

#[cfg(test)]
mod tests {
    use cdm_model::ObservationClass;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn classifies_reference_values() {
        assert_eq!(
            classify_observation("120"),
            ObservationValue::Numeric { value: 120.0 }
        );
        assert_eq!(
            classify_observation("98.6"),
            ObservationValue::Numeric { value: 98.6 }
        );
        assert_eq!(
            classify_observation("Elevated"),
            ObservationValue::NonNumeric {
                text: "Elevated".to_string()
            }
        );
        assert_eq!(classify_observation("").class(), ObservationClass::NonNumeric);
    }

    #[test]
    fn strict_parse_rejects_loose_forms() {
        assert_eq!(parse_strict_decimal("-3.5"), Some(-3.5));
        assert_eq!(parse_strict_decimal("+7"), Some(7.0));
        for raw in ["1,200", " 12", "1e3", "NaN", "inf", "1.2.3", "-", ".", "12 mg"] {
            assert_eq!(parse_strict_decimal(raw), None, "{raw}");
        }
    }

    #[test]
    fn reclassification_only_moves_lenient_numbers() {
        assert_eq!(reclassify_value(" 1,200 "), Some(1200.0));
        assert_eq!(reclassify_value("Elevated"), None);
        assert_eq!(reclassify_value("42"), None);
    }

    proptest! {
        #[test]
        fn classification_is_total_and_deterministic(raw in ".*") {
            let first = classify_observation(&raw);
            let second = classify_observation(&raw);
            prop_assert_eq!(&first, &second);
            if let ObservationValue::NonNumeric { text } = &first {
                prop_assert_eq!(text, &raw);
            }
        }

        #[test]
        fn formatted_numbers_are_numeric(value in -1.0e6f64..1.0e6) {
            let raw = format!("{value:.3}");
            prop_assert_eq!(classify_observation(&raw).class(), ObservationClass::Numeric);
        }
    }
}
