//! Per-column shape expectations derived from a file header.

use std::sync::LazyLock;

use regex::Regex;

const UUID_BODY: &str = r"[0-9A-Za-z]{8}-[0-9A-Za-z]{4}-[0-9A-Za-z]{4}-[0-9A-Za-z]{4}-[0-9A-Za-z]{12}";
const TIMESTAMP_BODY: &str = r"\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}Z)?";
const DATE_BODY: &str = r"\d{4}-\d{2}-\d{2}";
const DECIMAL_BODY: &str = r"-?\d+(?:\.\d+)?";

/// Compiled prefix, suffix and search forms of one column pattern.
struct Pattern {
    prefix: Regex,
    suffix: Regex,
    search: Regex,
}

impl Pattern {
    fn build(body: &str, search: &str) -> Self {
        Self {
            prefix: Regex::new(&format!(r"\A(?:{body})")).expect("valid prefix pattern"),
            suffix: Regex::new(&format!(r"(?:{body})\z")).expect("valid suffix pattern"),
            search: Regex::new(search).expect("valid search pattern"),
        }
    }
}

static IDENTIFIER: LazyLock<Pattern> = LazyLock::new(|| Pattern::build(UUID_BODY, UUID_BODY));
static TIMESTAMP: LazyLock<Pattern> =
    LazyLock::new(|| Pattern::build(TIMESTAMP_BODY, TIMESTAMP_BODY));
static DATE: LazyLock<Pattern> = LazyLock::new(|| Pattern::build(DATE_BODY, DATE_BODY));
// Codes embedded in free text are only trusted from four digits up.
static CODE: LazyLock<Pattern> = LazyLock::new(|| Pattern::build(r"\d+", r"\d{4,}"));
static DECIMAL: LazyLock<Pattern> =
    LazyLock::new(|| Pattern::build(DECIMAL_BODY, DECIMAL_BODY));

/// Shape class of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Fixed-length alphanumeric-with-hyphens identifier (UUID layout).
    Identifier,
    /// ISO datetime `YYYY-MM-DDTHH:MM:SSZ` or plain date.
    Timestamp,
    /// ISO date `YYYY-MM-DD`.
    Date,
    /// Run of digits (SNOMED, RxNorm, LOINC-free numeric codes).
    Code,
    /// Signed decimal number.
    Decimal,
    /// Anything else.
    Text,
}

impl ColumnKind {
    /// Infers the kind from a Synthea-style column name.
    pub fn for_column(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "ID" | "PATIENT" | "ENCOUNTER" | "PROVIDER" | "ORGANIZATION" | "PAYER" => {
                Self::Identifier
            }
            "START" | "STOP" | "DATE" => Self::Timestamp,
            "BIRTHDATE" | "DEATHDATE" => Self::Date,
            "CODE" | "REASONCODE" => Self::Code,
            "LAT" | "LON" | "HEALTHCARE_EXPENSES" | "HEALTHCARE_COVERAGE" | "BASE_ENCOUNTER_COST"
            | "TOTAL_CLAIM_COST" | "PAYER_COVERAGE" | "BASE_COST" | "TOTALCOST" | "DISPENSES"
            | "REVENUE" | "UTILIZATION" => Self::Decimal,
            _ => Self::Text,
        }
    }

    /// Whether values of this kind can be located by pattern.
    pub fn is_anchor(self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Whether a matching value always has the same length.
    pub fn is_fixed_width(self) -> bool {
        matches!(self, Self::Identifier | Self::Timestamp | Self::Date)
    }

    fn pattern(self) -> Option<&'static Pattern> {
        match self {
            Self::Identifier => Some(&IDENTIFIER),
            Self::Timestamp => Some(&TIMESTAMP),
            Self::Date => Some(&DATE),
            Self::Code => Some(&CODE),
            Self::Decimal => Some(&DECIMAL),
            Self::Text => None,
        }
    }

    /// Byte length of the value matching at the start of `text`.
    pub fn match_prefix(self, text: &str) -> Option<usize> {
        let found = self.pattern()?.prefix.find(text)?;
        (found.end() > 0).then_some(found.end())
    }

    /// Byte length of the value matching at the end of `text`.
    pub fn match_suffix(self, text: &str) -> Option<usize> {
        let found = self.pattern()?.suffix.find(text)?;
        (!found.is_empty()).then_some(found.len())
    }

    /// Byte offset of the first value of this kind inside `text`.
    pub fn find(self, text: &str) -> Option<usize> {
        self.pattern()?.search.find(text).map(|found| found.start())
    }

    /// Whether `value` as a whole has this kind's shape.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::Text => true,
            _ => self.match_prefix(value) == Some(value.len()),
        }
    }

    fn default_len(self) -> f64 {
        match self {
            Self::Identifier => 36.0,
            Self::Timestamp => 20.0,
            Self::Date => 10.0,
            Self::Code => 8.0,
            Self::Decimal => 8.0,
            Self::Text => 12.0,
        }
    }
}

/// Expectations for one header column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    /// Expected value length in characters.
    pub expected_len: f64,
    /// Whether the column may legitimately be empty.
    pub nullable: bool,
}

impl ColumnProfile {
    pub fn for_column(name: &str) -> Self {
        let kind = ColumnKind::for_column(name);
        let upper = name.trim().to_ascii_uppercase();
        let expected_len = text_len_hint(&upper).unwrap_or_else(|| kind.default_len());
        let nullable = match kind {
            ColumnKind::Identifier | ColumnKind::Code => upper == "REASONCODE",
            ColumnKind::Timestamp | ColumnKind::Date => upper == "STOP" || upper == "DEATHDATE",
            ColumnKind::Decimal | ColumnKind::Text => true,
        };
        Self {
            name: name.to_string(),
            kind,
            expected_len,
            nullable,
        }
    }

    /// Whether an already separated value is consistent with this column.
    pub fn fits(&self, value: &str) -> bool {
        if value.is_empty() {
            self.nullable
        } else {
            self.kind.accepts(value)
        }
    }
}

fn text_len_hint(upper: &str) -> Option<f64> {
    let hint = match upper {
        "DESCRIPTION" | "REASONDESCRIPTION" => 40.0,
        "ADDRESS" => 24.0,
        "NAME" => 20.0,
        "CITY" | "FIRST" | "LAST" | "MAIDEN" | "ENCOUNTERCLASS" | "SPECIALITY" => 10.0,
        "STATE" | "COUNTY" | "BIRTHPLACE" | "CATEGORY" => 14.0,
        "SSN" | "ETHNICITY" | "DRIVERS" | "PASSPORT" => 10.0,
        "UNITS" | "TYPE" | "RACE" | "ZIP" | "PREFIX" | "SUFFIX" => 5.0,
        "GENDER" | "MARITAL" => 1.0,
        "VALUE" => 6.0,
        _ => return None,
    };
    Some(hint)
}

/// Column profiles for one file, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowProfile {
    columns: Vec<ColumnProfile>,
}

impl RowProfile {
    pub fn from_header(header: &[String]) -> Self {
        Self {
            columns: header
                .iter()
                .map(|name| ColumnProfile::for_column(name))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[ColumnProfile] {
        &self.columns
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Refines expected lengths and nullability from rows that already
    /// match the header arity. Fixed-width columns keep their length.
    pub fn calibrate<'a>(&mut self, rows: impl IntoIterator<Item = &'a [String]>) {
        let arity = self.arity();
        let mut totals = vec![0usize; arity];
        let mut samples = 0usize;
        let mut empty_seen = vec![false; arity];
        for row in rows {
            if row.len() != arity {
                continue;
            }
            samples += 1;
            for (idx, value) in row.iter().enumerate() {
                totals[idx] += value.chars().count();
                if value.is_empty() {
                    empty_seen[idx] = true;
                }
            }
        }
        if samples == 0 {
            return;
        }
        for (idx, column) in self.columns.iter_mut().enumerate() {
            if empty_seen[idx] {
                column.nullable = true;
            }
            if !column.kind.is_fixed_width() {
                column.expected_len = (totals[idx] as f64 / samples as f64).max(1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "b9c610cd-28a6-4636-ccb6-c7a0d2a4cb85";

    #[test]
    fn infers_kind_from_synthea_names() {
        assert_eq!(ColumnKind::for_column("Id"), ColumnKind::Identifier);
        assert_eq!(ColumnKind::for_column("patient"), ColumnKind::Identifier);
        assert_eq!(ColumnKind::for_column("START"), ColumnKind::Timestamp);
        assert_eq!(ColumnKind::for_column("BIRTHDATE"), ColumnKind::Date);
        assert_eq!(ColumnKind::for_column("REASONCODE"), ColumnKind::Code);
        assert_eq!(ColumnKind::for_column("DESCRIPTION"), ColumnKind::Text);
    }

    #[test]
    fn timestamp_prefers_full_datetime() {
        let kind = ColumnKind::Timestamp;
        assert_eq!(kind.match_prefix("2019-01-01T08:00:00Zabc"), Some(20));
        assert_eq!(kind.match_prefix("2019-01-01abc"), Some(10));
        assert_eq!(kind.match_suffix("abc2019-01-01T08:00:00Z"), Some(20));
        assert_eq!(kind.match_prefix("abc"), None);
    }

    #[test]
    fn identifier_anchors_at_both_ends() {
        let fused = format!("{UUID}tail");
        assert_eq!(ColumnKind::Identifier.match_prefix(&fused), Some(36));
        let fused = format!("head{UUID}");
        assert_eq!(ColumnKind::Identifier.match_suffix(&fused), Some(36));
        assert_eq!(ColumnKind::Identifier.find(&fused), Some(4));
    }

    #[test]
    fn code_search_ignores_short_digit_runs() {
        assert_eq!(ColumnKind::Code.find("Stage 2 disease 44054006"), Some(16));
        assert_eq!(ColumnKind::Code.match_prefix("44054006Diabetes"), Some(8));
    }

    #[test]
    fn calibrate_learns_lengths_and_nulls() {
        let header: Vec<String> = ["Id", "DESCRIPTION"].map(String::from).to_vec();
        let mut profile = RowProfile::from_header(&header);
        let rows = [
            vec![UUID.to_string(), "abcd".to_string()],
            vec![UUID.to_string(), "abcdef".to_string()],
            vec!["short".to_string()],
        ];
        profile.calibrate(rows.iter().map(Vec::as_slice));
        assert_eq!(profile.columns()[0].expected_len, 36.0);
        assert_eq!(profile.columns()[1].expected_len, 5.0);
        assert!(!profile.columns()[0].nullable);
    }
}
