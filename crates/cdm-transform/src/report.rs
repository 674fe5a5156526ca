//! Per-transform outcome counters.

use std::collections::BTreeMap;

use serde::Serialize;

/// Counters reported by one transform run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub transform: &'static str,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rows dropped because their subject is unknown.
    pub orphan_rows: u64,
    /// Dates that could not be parsed, in dropped rows or nulled cells.
    pub invalid_dates: u64,
    /// Rows written with the unmapped concept sentinel.
    pub unmapped: u64,
    /// Rows moved between tables by a maintenance pass.
    pub moved: u64,
    /// Rows written per target table.
    pub tables: BTreeMap<&'static str, u64>,
}

impl TransformReport {
    pub fn new(transform: &'static str) -> Self {
        Self {
            transform,
            ..Self::default()
        }
    }

    pub(crate) fn written(&mut self, table: &'static str, rows: u64) {
        self.rows_written += rows;
        *self.tables.entry(table).or_default() += rows;
    }

    /// Non-zero recoverable-error counters, for the stage summary.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        [
            ("rows_read", self.rows_read),
            ("orphan_rows", self.orphan_rows),
            ("invalid_dates", self.invalid_dates),
            ("unmapped", self.unmapped),
            ("moved", self.moved),
        ]
        .into_iter()
        .filter(|(name, value)| *value > 0 || *name == "rows_read")
        .map(|(name, value)| (name.to_string(), value))
        .chain(
            self.tables
                .iter()
                .filter(|_| self.tables.len() > 1)
                .map(|(table, rows)| (format!("rows_{table}"), *rows)),
        )
        .collect()
    }
}
