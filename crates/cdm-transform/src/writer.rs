//! Batched writes into a freshly truncated target table.

use tracing::debug;

use cdm_model::{CancellationToken, Row, TableSchema};
use cdm_store::Store;

use crate::error::{Result, TransformError};
use crate::schema::target_schema;

/// Creates (or empties) a target table, then buffers rows and writes them
/// in batches.
pub struct TableWriter<'a> {
    store: &'a dyn Store,
    table: &'static str,
    transform: &'static str,
    batch_size: usize,
    cancel: &'a CancellationToken,
    buffer: Vec<Row>,
    written: u64,
}

impl<'a> TableWriter<'a> {
    /// Opens `table` for a full rewrite.
    pub fn create(
        store: &'a dyn Store,
        table: &'static str,
        transform: &'static str,
        batch_size: usize,
        cancel: &'a CancellationToken,
    ) -> Result<Self> {
        let schema = target_schema(table).ok_or_else(|| TransformError::MissingTarget {
            table: table.to_string(),
            stage: transform,
        })?;
        reset_table(store, &schema)?;
        Ok(Self {
            store,
            table,
            transform,
            batch_size: batch_size.max(1),
            cancel,
            buffer: Vec::with_capacity(batch_size.clamp(1, 4096)),
            written: 0,
        })
    }

    /// Opens an existing target for appending.
    pub fn append(
        store: &'a dyn Store,
        table: &'static str,
        transform: &'static str,
        batch_size: usize,
        cancel: &'a CancellationToken,
    ) -> Result<Self> {
        let exists = store
            .table_exists(table)
            .map_err(|e| TransformError::store(table, e))?;
        if !exists {
            return Err(TransformError::MissingTarget {
                table: table.to_string(),
                stage: transform,
            });
        }
        Ok(Self {
            store,
            table,
            transform,
            batch_size: batch_size.max(1),
            cancel,
            buffer: Vec::new(),
            written: 0,
        })
    }

    pub fn push(&mut self, row: Row) -> Result<()> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes buffered rows and returns the total written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        Ok(self.written)
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(TransformError::Cancelled {
                transform: self.transform,
                written: self.written,
            });
        }
        let inserted = self
            .store
            .insert_batch(self.table, &self.buffer)
            .map_err(|e| TransformError::store(self.table, e))?;
        self.written += inserted as u64;
        debug!(table = self.table, inserted, total = self.written, "wrote batch");
        self.buffer.clear();
        Ok(())
    }
}

/// Ensures `schema` exists and is empty.
fn reset_table(store: &dyn Store, schema: &TableSchema) -> Result<()> {
    let table = schema.name.as_str();
    let existing = store
        .table_schema(table)
        .map_err(|e| TransformError::store(table, e))?;
    let reset = match existing {
        Some(existing) if existing == *schema => store.truncate(table),
        Some(_) => store
            .drop_table(table)
            .and_then(|()| store.create_table(schema)),
        None => store.create_table(schema),
    };
    reset.map_err(|e| TransformError::store(table, e))
}

#[cfg(test)]
mod tests {
    use cdm_model::Value;
    use cdm_store::MemoryStore;

    use super::*;
    use crate::schema::OBSERVATION_PERIOD;

    fn period(id: i64) -> Row {
        vec![
            Value::Int(id),
            Value::Int(1),
            Value::Null,
            Value::Null,
            Value::Int(32817),
        ]
    }

    #[test]
    fn create_truncates_previous_contents() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        for _ in 0..2 {
            let mut writer =
                TableWriter::create(&store, OBSERVATION_PERIOD, "test", 2, &cancel).unwrap();
            for id in 1..=3 {
                writer.push(period(id)).unwrap();
            }
            assert_eq!(writer.finish().unwrap(), 3);
        }
        assert_eq!(store.count(OBSERVATION_PERIOD).unwrap(), 3);
    }

    #[test]
    fn cancellation_stops_before_next_batch() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let mut writer =
            TableWriter::create(&store, OBSERVATION_PERIOD, "test", 2, &cancel).unwrap();
        writer.push(period(1)).unwrap();
        writer.push(period(2)).unwrap();
        cancel.cancel();
        writer.push(period(3)).unwrap();
        let err = writer.push(period(4)).unwrap_err();
        assert!(matches!(err, TransformError::Cancelled { written: 2, .. }));
    }

    #[test]
    fn append_requires_existing_table() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        assert!(TableWriter::append(&store, OBSERVATION_PERIOD, "test", 2, &cancel).is_err());
    }
}
