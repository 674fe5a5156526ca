//! Record repair: reconstructing header-arity rows from malformed lines.
//!
//! A line is split on the nominal delimiter and handed to a chain of
//! [`RepairStrategy`] implementations. The first strategy that produces
//! exactly one value per header column wins; when none does, the row is a
//! [`RepairFailure`]. The chain is a pure function of the row and the
//! [`RowProfile`], so repairing the same row twice always agrees.

mod file;
mod profile;
mod segment;
mod strategies;

use serde::Serialize;
use thiserror::Error;

pub use file::{FileRepairReport, RepairOptions, repair_file};
pub use profile::{ColumnKind, ColumnProfile, RowProfile};
pub use segment::{SplitMode, proportional_split, segment};
pub use strategies::{
    AnchoredSplit, PartialSalvage, ProportionalSplit, RepairStrategy, WellFormed,
};

/// Why a row could not be reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairError {
    /// More separators than the header has; fields cannot be merged back.
    #[error("row has {observed} fields but the header has {expected}")]
    TooManyFields { observed: usize, expected: usize },

    /// Every strategy declined.
    #[error("no repair strategy rebuilt {expected} fields from {observed}")]
    Unresolved { observed: usize, expected: usize },
}

/// A row that could not be reconstructed to header arity.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {reason}")]
pub struct RepairFailure {
    /// 1-based line number in the source file.
    pub line: u64,
    /// The row as read, re-joined on the nominal delimiter.
    pub raw: String,
    pub reason: RepairError,
}

/// A reconstructed row and the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedRow {
    pub values: Vec<String>,
    pub strategy: &'static str,
}

impl RepairedRow {
    pub fn was_repaired(&self) -> bool {
        self.strategy != WellFormed::NAME
    }
}

/// Ordered chain of repair strategies bound to one file's profile.
pub struct RepairEngine {
    profile: RowProfile,
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl RepairEngine {
    /// Builds the standard chain: well-formed, anchored split, proportional
    /// split, partial salvage. The proportional steps are left out when
    /// `proportional_fallback` is off.
    pub fn new(profile: RowProfile, proportional_fallback: bool) -> Self {
        let mut strategies: Vec<Box<dyn RepairStrategy>> =
            vec![Box::new(WellFormed), Box::new(AnchoredSplit)];
        if proportional_fallback {
            strategies.push(Box::new(ProportionalSplit));
        }
        strategies.push(Box::new(PartialSalvage::anchored()));
        if proportional_fallback {
            strategies.push(Box::new(PartialSalvage::proportional()));
        }
        Self {
            profile,
            strategies,
        }
    }

    pub fn for_header(header: &[String]) -> Self {
        Self::new(RowProfile::from_header(header), true)
    }

    pub fn with_strategies(profile: RowProfile, strategies: Vec<Box<dyn RepairStrategy>>) -> Self {
        Self {
            profile,
            strategies,
        }
    }

    pub fn profile(&self) -> &RowProfile {
        &self.profile
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .map(|strategy| strategy.name())
            .collect()
    }

    /// Reconstructs one row, or explains why it cannot be.
    pub fn repair(&self, fields: &[String]) -> Result<RepairedRow, RepairError> {
        let expected = self.profile.arity();
        let observed = fields.len();
        if observed > expected {
            return Err(RepairError::TooManyFields { observed, expected });
        }
        for strategy in &self.strategies {
            if let Some(values) = strategy.attempt(fields, &self.profile)
                && values.len() == expected
            {
                return Ok(RepairedRow {
                    values,
                    strategy: strategy.name(),
                });
            }
        }
        Err(RepairError::Unresolved { observed, expected })
    }

    /// Like [`RepairEngine::repair`], attaching line context to a failure.
    pub fn repair_line(&self, line: u64, fields: &[String]) -> Result<RepairedRow, RepairFailure> {
        self.repair(fields).map_err(|reason| RepairFailure {
            line,
            raw: fields.join(","),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ID: &str = "0b5b2fe1-0c7e-4c5d-9c1b-4a2f0e3c9d11";
    const PATIENT: &str = "1d604da9-9a81-4ba9-80c2-de3375d59b40";

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn well_formed_rows_pass_through() {
        let engine = RepairEngine::for_header(&header(&["id", "start", "stop", "patient"]));
        let fields = header(&[ID, "2020-01-01", "", PATIENT]);
        let repaired = engine.repair(&fields).unwrap();
        assert_eq!(repaired.values, fields);
        assert!(!repaired.was_repaired());
    }

    #[test]
    fn fused_row_is_rebuilt_by_anchors() {
        let engine = RepairEngine::for_header(&header(&["id", "start", "stop", "patient"]));
        let fused = vec![format!("{ID}2020-01-01T10:00:00Z2020-01-01T11:00:00Z{PATIENT}")];
        let repaired = engine.repair(&fused).unwrap();
        assert_eq!(repaired.strategy, "anchored");
        assert_eq!(
            repaired.values,
            header(&[ID, "2020-01-01T10:00:00Z", "2020-01-01T11:00:00Z", PATIENT])
        );
    }

    #[test]
    fn fused_row_with_bad_identifier_is_unresolved() {
        let engine = RepairEngine::for_header(&header(&["id", "start", "stop", "patient"]));
        let stamps = "2020-01-01T10:00:00Z2020-01-01T11:00:00Z";
        for fused in [format!("{ID}{stamps}hello"), format!("{ID}{stamps}")] {
            let failure = engine.repair_line(2, &[fused]).unwrap_err();
            assert_eq!(
                failure.reason,
                RepairError::Unresolved {
                    observed: 1,
                    expected: 4
                }
            );
        }
    }

    #[test]
    fn overflowing_row_fails() {
        let engine = RepairEngine::for_header(&header(&["a", "b"]));
        let failure = engine.repair_line(7, &header(&["1", "2", "3"])).unwrap_err();
        assert_eq!(failure.line, 7);
        assert_eq!(failure.raw, "1,2,3");
        assert_eq!(
            failure.reason,
            RepairError::TooManyFields {
                observed: 3,
                expected: 2
            }
        );
    }

    #[test]
    fn disabling_proportional_fallback_leaves_free_runs_unresolved() {
        let names = header(&["Id", "FIRST", "LAST"]);
        let strict = RepairEngine::new(RowProfile::from_header(&names), false);
        let fused = vec![format!("{ID}AnnaMoss")];
        assert!(matches!(
            strict.repair(&fused),
            Err(RepairError::Unresolved { .. })
        ));
        let lenient = RepairEngine::new(RowProfile::from_header(&names), true);
        assert_eq!(lenient.repair(&fused).unwrap().strategy, "proportional");
    }

    #[test]
    fn chain_order_is_stable() {
        let engine = RepairEngine::for_header(&header(&["a"]));
        assert_eq!(
            engine.strategy_names(),
            vec![
                "well_formed",
                "anchored",
                "proportional",
                "partial_salvage",
                "partial_salvage_proportional"
            ]
        );
    }

    const COLUMNS: &[&str] = &[
        "Id",
        "START",
        "STOP",
        "PATIENT",
        "CODE",
        "DESCRIPTION",
        "VALUE",
        "UNITS",
    ];

    fn arb_row() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
        proptest::sample::subsequence(COLUMNS.to_vec(), 1..=COLUMNS.len()).prop_flat_map(
            |names| {
                let arity = names.len();
                (
                    Just(names.iter().map(|name| (*name).to_string()).collect::<Vec<_>>()),
                    proptest::collection::vec("[A-Za-z0-9 .:-]{0,12}", 1..=arity + 1),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn repaired_rows_always_match_header_arity((names, fields) in arb_row()) {
            let engine = RepairEngine::for_header(&names);
            if let Ok(repaired) = engine.repair(&fields) {
                prop_assert_eq!(repaired.values.len(), names.len());
                let again = engine.repair(&fields).unwrap();
                prop_assert_eq!(&again, &repaired);
                let stable = engine.repair(&repaired.values).unwrap();
                prop_assert_eq!(stable.values, repaired.values);
            } else {
                prop_assert!(engine.repair(&fields).is_err());
            }
        }

        #[test]
        fn fixed_width_rows_survive_full_fusion(
            id in "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            patient in "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            day in 1u32..=28,
            hour in 0u32..=22,
        ) {
            let start = format!("2021-05-{day:02}T{hour:02}:00:00Z");
            let stop = format!("2021-05-{day:02}T{:02}:30:00Z", hour + 1);
            let engine = RepairEngine::for_header(&header(&["id", "start", "stop", "patient"]));
            let fused = vec![format!("{id}{start}{stop}{patient}")];
            let repaired = engine.repair(&fused).unwrap();
            prop_assert_eq!(repaired.values, vec![id, start, stop, patient]);
        }
    }
}
