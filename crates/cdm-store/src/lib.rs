//! Store collaborator for the CDM pipeline.
//!
//! The pipeline needs only four primitives from its backing store:
//!
//! - atomic batch insert of many rows per call
//! - strictly increasing, gap-free integer counters
//! - insert-if-absent semantics for key mapping tables
//! - point-in-time row counts per table
//!
//! [`Store`] captures those primitives plus the table housekeeping the
//! loader and transforms need. [`MemoryStore`] serves tests and single-node
//! runs; [`SqliteStore`] persists to a database file. [`RetryingStore`]
//! wraps either one with bounded retry for transient failures.

pub mod error;
pub mod memory;
pub mod retry;
pub mod sqlite;

use std::sync::Arc;

use cdm_model::{
    EntityKind, KeyAssignment, KeyMapping, RetrySettings, Row, StoreBackend, TableSchema,
};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use retry::{RetryingStore, with_retry};
pub use sqlite::SqliteStore;

/// Backing store used by every pipeline stage.
///
/// Implementations must be safe to share across worker threads. Writes to a
/// single table are serialized by the implementation.
pub trait Store: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Creates a table if it does not exist yet.
    ///
    /// Creating an existing table with an identical schema is a no-op; a
    /// differing schema is a [`StoreError::SchemaConflict`].
    fn create_table(&self, schema: &TableSchema) -> Result<()>;

    fn table_schema(&self, table: &str) -> Result<Option<TableSchema>>;

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.table_schema(table)?.is_some())
    }

    /// Drops a table and its rows. Dropping a missing table is a no-op.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Removes every row from an existing table.
    fn truncate(&self, table: &str) -> Result<()>;

    /// Inserts all rows or none of them.
    fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<usize>;

    /// Reads every row of a table in insertion order.
    fn scan(&self, table: &str) -> Result<Vec<Row>>;

    /// Point-in-time row count; 0 for a table that does not exist.
    fn count(&self, table: &str) -> Result<u64>;

    /// Draws the next value of a named counter. The first value is 1.
    fn next_value(&self, counter: &str) -> Result<i64>;

    /// Last value drawn from a counter, 0 when never drawn.
    fn current_value(&self, counter: &str) -> Result<i64>;

    /// Returns the existing internal key for `external_key`, or atomically
    /// draws a new one from the kind's counter and records the mapping.
    fn assign_key(&self, kind: EntityKind, external_key: &str) -> Result<KeyAssignment>;

    /// Bulk variant of [`Store::assign_key`], executed as one atomic unit.
    ///
    /// Results follow the input order. Repeated keys within one call map to
    /// the same internal key.
    fn assign_keys(&self, kind: EntityKind, external_keys: &[String])
    -> Result<Vec<KeyAssignment>>;

    /// Snapshot of every mapping of one kind, ordered by internal key.
    fn key_mappings(&self, kind: EntityKind) -> Result<Vec<KeyMapping>>;

    fn mapping_count(&self, kind: EntityKind) -> Result<u64>;

    /// Removes every mapping of one kind and resets its counter.
    ///
    /// Only valid between independent full reloads.
    fn truncate_mappings(&self, kind: EntityKind) -> Result<()>;
}

/// Opens the configured backend wrapped in a [`RetryingStore`].
pub fn open_store(backend: &StoreBackend, retry: RetrySettings) -> Result<Arc<dyn Store>> {
    let inner: Arc<dyn Store> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite(path) => Arc::new(SqliteStore::open(path)?),
    };
    Ok(Arc::new(RetryingStore::new(inner, retry)))
}

pub(crate) fn check_arity(table: &TableSchema, rows: &[Row]) -> Result<()> {
    let expected = table.arity();
    for (row, values) in rows.iter().enumerate() {
        if values.len() != expected {
            return Err(StoreError::ArityMismatch {
                table: table.name.clone(),
                row,
                expected,
                actual: values.len(),
            });
        }
    }
    Ok(())
}
