//! Read access to staged (text-only) tables.

use std::collections::HashMap;

use tracing::debug;

use cdm_model::{Row, SourceEntity, Value};
use cdm_store::Store;

use crate::error::{Result, TransformError};

/// Rows of one staged table with case-insensitive column lookup.
#[derive(Debug, Clone)]
pub struct StagedTable {
    table: String,
    positions: HashMap<String, usize>,
    rows: Vec<Row>,
}

impl StagedTable {
    /// Reads the staged table of `entity`, checking that every column the
    /// transforms use is present.
    pub fn read(store: &dyn Store, entity: SourceEntity) -> Result<Self> {
        let table = entity.staging_table();
        let schema = store
            .table_schema(&table)
            .map_err(|e| TransformError::store(&table, e))?
            .ok_or_else(|| TransformError::MissingStagedTable {
                table: table.clone(),
            })?;
        let positions: HashMap<String, usize> = schema
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name.to_ascii_lowercase(), idx))
            .collect();
        for column in entity.columns() {
            if !positions.contains_key(&column.to_ascii_lowercase()) {
                return Err(TransformError::MissingColumn {
                    table,
                    column: (*column).to_string(),
                });
            }
        }
        let rows = store
            .scan(&table)
            .map_err(|e| TransformError::store(&table, e))?;
        debug!(table = %table, rows = rows.len(), "read staged table");
        Ok(Self {
            table,
            positions,
            rows,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = StagedRow<'_>> {
        self.rows.iter().enumerate().map(|(ordinal, cells)| StagedRow {
            table: self,
            ordinal,
            cells,
        })
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(&column.to_ascii_lowercase()).copied()
    }
}

/// One staged row.
#[derive(Debug, Clone, Copy)]
pub struct StagedRow<'a> {
    table: &'a StagedTable,
    /// 0-based position in the staged table.
    pub ordinal: usize,
    cells: &'a [Value],
}

impl<'a> StagedRow<'a> {
    /// Trimmed text of `column`; empty for null cells and unknown columns.
    pub fn get(&self, column: &str) -> &'a str {
        self.table
            .position(column)
            .and_then(|idx| self.cells.get(idx))
            .and_then(Value::as_str)
            .map_or("", str::trim)
    }

    /// Untrimmed text of `column`, exactly as staged.
    pub fn raw(&self, column: &str) -> &'a str {
        self.table
            .position(column)
            .and_then(|idx| self.cells.get(idx))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Like [`StagedRow::get`], `None` for empty values.
    pub fn optional(&self, column: &str) -> Option<&'a str> {
        Some(self.get(column)).filter(|value| !value.is_empty())
    }

    pub fn cells(&self) -> &'a [Value] {
        self.cells
    }
}
