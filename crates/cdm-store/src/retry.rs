//! Bounded retry with exponential backoff for transient store failures.

use std::sync::Arc;
use std::thread;

use tracing::warn;

use cdm_model::{EntityKind, KeyAssignment, KeyMapping, RetrySettings, Row, TableSchema};

use crate::Store;
use crate::error::Result;

/// Runs `op`, retrying while it fails with a transient error.
///
/// Permanent errors and the error of the last allowed attempt are returned
/// unchanged.
pub fn with_retry<T>(
    settings: &RetrySettings,
    operation: &'static str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < settings.max_retries => {
                let delay = settings.delay_for(attempt);
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    max_retries = settings.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient store failure, retrying"
                );
                thread::sleep(delay);
            }
            Err(error) => return Err(error),
        }
    }
}

/// Store decorator that applies [`with_retry`] to every operation.
///
/// Every wrapped operation is atomic in the inner store, so repeating a
/// failed attempt never leaves partial effects behind.
#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn Store>,
    settings: RetrySettings,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn Store>, settings: RetrySettings) -> Self {
        Self { inner, settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }
}

impl Store for RetryingStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn create_table(&self, schema: &TableSchema) -> Result<()> {
        with_retry(&self.settings, "create_table", || {
            self.inner.create_table(schema)
        })
    }

    fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        with_retry(&self.settings, "table_schema", || {
            self.inner.table_schema(table)
        })
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        with_retry(&self.settings, "drop_table", || self.inner.drop_table(table))
    }

    fn truncate(&self, table: &str) -> Result<()> {
        with_retry(&self.settings, "truncate", || self.inner.truncate(table))
    }

    fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<usize> {
        with_retry(&self.settings, "insert_batch", || {
            self.inner.insert_batch(table, rows)
        })
    }

    fn scan(&self, table: &str) -> Result<Vec<Row>> {
        with_retry(&self.settings, "scan", || self.inner.scan(table))
    }

    fn count(&self, table: &str) -> Result<u64> {
        with_retry(&self.settings, "count", || self.inner.count(table))
    }

    fn next_value(&self, counter: &str) -> Result<i64> {
        with_retry(&self.settings, "next_value", || self.inner.next_value(counter))
    }

    fn current_value(&self, counter: &str) -> Result<i64> {
        with_retry(&self.settings, "current_value", || {
            self.inner.current_value(counter)
        })
    }

    fn assign_key(&self, kind: EntityKind, external_key: &str) -> Result<KeyAssignment> {
        with_retry(&self.settings, "assign_key", || {
            self.inner.assign_key(kind, external_key)
        })
    }

    fn assign_keys(
        &self,
        kind: EntityKind,
        external_keys: &[String],
    ) -> Result<Vec<KeyAssignment>> {
        with_retry(&self.settings, "assign_keys", || {
            self.inner.assign_keys(kind, external_keys)
        })
    }

    fn key_mappings(&self, kind: EntityKind) -> Result<Vec<KeyMapping>> {
        with_retry(&self.settings, "key_mappings", || {
            self.inner.key_mappings(kind)
        })
    }

    fn mapping_count(&self, kind: EntityKind) -> Result<u64> {
        with_retry(&self.settings, "mapping_count", || {
            self.inner.mapping_count(kind)
        })
    }

    fn truncate_mappings(&self, kind: EntityKind) -> Result<()> {
        with_retry(&self.settings, "truncate_mappings", || {
            self.inner.truncate_mappings(kind)
        })
    }
}
