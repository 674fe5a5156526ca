//! In-process store guarded by a single mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use cdm_model::{EntityKind, KeyAssignment, KeyMapping, Row, TableSchema};

use crate::error::{Result, StoreError};
use crate::{Store, check_arity};

/// Store that keeps every table, counter and mapping in memory.
///
/// One mutex covers all state, so a key assignment observes and updates the
/// counter and the mapping index as a single unit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    counters: HashMap<String, i64>,
    mappings: HashMap<EntityKind, KindMappings>,
}

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct KindMappings {
    by_external: HashMap<String, usize>,
    entries: Vec<KeyMapping>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| StoreError::TableNotFound {
            table: name.to_string(),
        })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound {
                table: name.to_string(),
            })
    }

    fn draw(&mut self, counter: &str) -> i64 {
        let value = self.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    fn assign(&mut self, kind: EntityKind, external_key: &str) -> KeyAssignment {
        if let Some(idx) = self
            .mappings
            .get(&kind)
            .and_then(|kind_map| kind_map.by_external.get(external_key))
            .copied()
        {
            return KeyAssignment::existing(self.mappings[&kind].entries[idx].internal_key);
        }
        let internal_key = self.draw(&kind.counter_name());
        let kind_map = self.mappings.entry(kind).or_default();
        kind_map
            .by_external
            .insert(external_key.to_string(), kind_map.entries.len());
        kind_map.entries.push(KeyMapping {
            kind,
            external_key: external_key.to_string(),
            internal_key,
            created_at: Utc::now(),
        });
        KeyAssignment::created(internal_key)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let mut state = self.lock()?;
        match state.tables.get(&schema.name) {
            Some(existing) if existing.schema == *schema => Ok(()),
            Some(_) => Err(StoreError::SchemaConflict {
                table: schema.name.clone(),
            }),
            None => {
                state.tables.insert(
                    schema.name.clone(),
                    MemoryTable {
                        schema: schema.clone(),
                        rows: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        let state = self.lock()?;
        Ok(state.tables.get(table).map(|entry| entry.schema.clone()))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.lock()?.tables.remove(table);
        Ok(())
    }

    fn truncate(&self, table: &str) -> Result<()> {
        self.lock()?.table_mut(table)?.rows.clear();
        Ok(())
    }

    fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<usize> {
        let mut state = self.lock()?;
        let entry = state.table_mut(table)?;
        check_arity(&entry.schema, rows)?;
        entry.rows.extend(rows.iter().cloned());
        Ok(rows.len())
    }

    fn scan(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.lock()?.table(table)?.rows.clone())
    }

    fn count(&self, table: &str) -> Result<u64> {
        let state = self.lock()?;
        Ok(state
            .tables
            .get(table)
            .map_or(0, |entry| entry.rows.len() as u64))
    }

    fn next_value(&self, counter: &str) -> Result<i64> {
        Ok(self.lock()?.draw(counter))
    }

    fn current_value(&self, counter: &str) -> Result<i64> {
        Ok(self.lock()?.counters.get(counter).copied().unwrap_or(0))
    }

    fn assign_key(&self, kind: EntityKind, external_key: &str) -> Result<KeyAssignment> {
        Ok(self.lock()?.assign(kind, external_key))
    }

    fn assign_keys(
        &self,
        kind: EntityKind,
        external_keys: &[String],
    ) -> Result<Vec<KeyAssignment>> {
        let mut state = self.lock()?;
        Ok(external_keys
            .iter()
            .map(|key| state.assign(kind, key))
            .collect())
    }

    fn key_mappings(&self, kind: EntityKind) -> Result<Vec<KeyMapping>> {
        let state = self.lock()?;
        Ok(state
            .mappings
            .get(&kind)
            .map(|kind_map| kind_map.entries.clone())
            .unwrap_or_default())
    }

    fn mapping_count(&self, kind: EntityKind) -> Result<u64> {
        let state = self.lock()?;
        Ok(state
            .mappings
            .get(&kind)
            .map_or(0, |kind_map| kind_map.entries.len() as u64))
    }

    fn truncate_mappings(&self, kind: EntityKind) -> Result<()> {
        let mut state = self.lock()?;
        state.mappings.remove(&kind);
        state.counters.remove(&kind.counter_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cdm_model::{ColumnDef, ColumnType, Value};

    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            "person",
            vec![
                ColumnDef::new("person_id", ColumnType::Integer),
                ColumnDef::text("person_source_value"),
            ],
        )
    }

    #[test]
    fn insert_rejects_whole_batch_on_bad_row() {
        let store = MemoryStore::new();
        store.create_table(&schema()).unwrap();
        let rows = vec![
            vec![Value::Int(1), Value::text("a")],
            vec![Value::Int(2)],
        ];
        let err = store.insert_batch("person", &rows).unwrap_err();
        assert!(matches!(err, StoreError::ArityMismatch { row: 1, .. }));
        assert_eq!(store.count("person").unwrap(), 0);
    }

    #[test]
    fn create_table_detects_schema_conflict() {
        let store = MemoryStore::new();
        store.create_table(&schema()).unwrap();
        store.create_table(&schema()).unwrap();
        let other = TableSchema::new("person", vec![ColumnDef::text("x")]);
        assert!(matches!(
            store.create_table(&other),
            Err(StoreError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn truncate_mappings_resets_counter() {
        let store = MemoryStore::new();
        store.assign_key(EntityKind::Subject, "a").unwrap();
        store.assign_key(EntityKind::Subject, "b").unwrap();
        store.truncate_mappings(EntityKind::Subject).unwrap();
        assert_eq!(store.mapping_count(EntityKind::Subject).unwrap(), 0);
        let again = store.assign_key(EntityKind::Subject, "b").unwrap();
        assert_eq!(again, KeyAssignment::created(1));
    }
}
