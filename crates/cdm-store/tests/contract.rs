//! Contract tests run against every store backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rayon::prelude::*;

use cdm_model::{ColumnDef, ColumnType, EntityKind, TableSchema, Value};
use cdm_store::{MemoryStore, SqliteStore, Store};

fn backends() -> Vec<(&'static str, Arc<dyn Store>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().expect("create temp dir");
    let sqlite = SqliteStore::open(dir.path().join("cdm.db")).expect("open sqlite store");
    vec![
        ("memory", Arc::new(MemoryStore::new()) as Arc<dyn Store>, None),
        ("sqlite", Arc::new(sqlite) as Arc<dyn Store>, Some(dir)),
    ]
}

fn staging_schema() -> TableSchema {
    TableSchema::staging(
        "stg_encounters",
        &["Id".to_string(), "START".to_string(), "PATIENT".to_string()],
    )
}

#[test]
fn batch_insert_and_count() {
    for (name, store, _dir) in backends() {
        store.create_table(&staging_schema()).unwrap();
        assert_eq!(store.count("stg_encounters").unwrap(), 0, "{name}");
        let rows: Vec<_> = (0..25)
            .map(|idx| {
                vec![
                    Value::text(format!("e{idx}")),
                    Value::text("2020-01-01"),
                    Value::text("p1"),
                ]
            })
            .collect();
        assert_eq!(store.insert_batch("stg_encounters", &rows).unwrap(), 25);
        assert_eq!(store.count("stg_encounters").unwrap(), 25, "{name}");
        let scanned = store.scan("stg_encounters").unwrap();
        assert_eq!(scanned.first().unwrap()[0], Value::text("e0"), "{name}");
        assert_eq!(scanned.last().unwrap()[0], Value::text("e24"), "{name}");

        store.truncate("stg_encounters").unwrap();
        assert_eq!(store.count("stg_encounters").unwrap(), 0, "{name}");
        store.drop_table("stg_encounters").unwrap();
        assert!(!store.table_exists("stg_encounters").unwrap(), "{name}");
        assert_eq!(store.count("stg_encounters").unwrap(), 0, "{name}");
    }
}

#[test]
fn missing_table_is_reported() {
    for (name, store, _dir) in backends() {
        let err = store.insert_batch("nope", &[vec![Value::Null]]).unwrap_err();
        assert!(
            matches!(err, cdm_store::StoreError::TableNotFound { .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn counters_are_gap_free_under_concurrency() {
    for (name, store, _dir) in backends() {
        let drawn: Vec<i64> = (0..200)
            .into_par_iter()
            .map(|_| store.next_value("condition_occurrence_id").unwrap())
            .collect();
        let unique: BTreeSet<i64> = drawn.iter().copied().collect();
        assert_eq!(unique.len(), 200, "{name}");
        assert_eq!(*unique.first().unwrap(), 1, "{name}");
        assert_eq!(*unique.last().unwrap(), 200, "{name}");
        assert_eq!(store.current_value("condition_occurrence_id").unwrap(), 200);
        assert_eq!(store.current_value("never_drawn").unwrap(), 0);
    }
}

#[test]
fn key_assignment_is_idempotent_under_concurrency() {
    for (name, store, _dir) in backends() {
        let keys: Vec<String> = (0..40).map(|idx| format!("patient-{}", idx % 10)).collect();
        let assigned: Vec<(String, i64)> = keys
            .par_iter()
            .map(|key| {
                let assignment = store.assign_key(EntityKind::Subject, key).unwrap();
                (key.clone(), assignment.internal_key)
            })
            .collect();
        let mut by_key: HashMap<String, BTreeSet<i64>> = HashMap::new();
        for (key, internal) in assigned {
            by_key.entry(key).or_default().insert(internal);
        }
        assert_eq!(by_key.len(), 10, "{name}");
        assert!(by_key.values().all(|keys| keys.len() == 1), "{name}");
        assert_eq!(store.mapping_count(EntityKind::Subject).unwrap(), 10);
        assert_eq!(
            store
                .current_value(&EntityKind::Subject.counter_name())
                .unwrap(),
            10,
            "{name}"
        );
        let internal: BTreeSet<i64> = store
            .key_mappings(EntityKind::Subject)
            .unwrap()
            .iter()
            .map(|mapping| mapping.internal_key)
            .collect();
        assert_eq!(internal, (1..=10).collect(), "{name}");
    }
}

#[test]
fn bulk_assignment_matches_single_assignment() {
    for (name, store, _dir) in backends() {
        let first = store.assign_key(EntityKind::Encounter, "e2").unwrap();
        assert!(first.created);
        let keys: Vec<String> = ["e1", "e2", "e3", "e1"]
            .iter()
            .map(|key| (*key).to_string())
            .collect();
        let bulk = store.assign_keys(EntityKind::Encounter, &keys).unwrap();
        let internal: Vec<i64> = bulk.iter().map(|a| a.internal_key).collect();
        assert_eq!(internal, vec![2, 1, 3, 2], "{name}");
        let created: Vec<bool> = bulk.iter().map(|a| a.created).collect();
        assert_eq!(created, vec![true, false, true, false], "{name}");
        // Kinds do not share counters.
        let other = store.assign_key(EntityKind::Provider, "e1").unwrap();
        assert_eq!(other.internal_key, 1, "{name}");
    }
}

#[test]
fn sqlite_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cdm.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .create_table(&TableSchema::new(
                "person",
                vec![ColumnDef::new("person_id", ColumnType::Integer)],
            ))
            .unwrap();
        store.insert_batch("person", &[vec![Value::Int(1)]]).unwrap();
        store.assign_key(EntityKind::Subject, "p-1").unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.count("person").unwrap(), 1);
    let again = store.assign_key(EntityKind::Subject, "p-1").unwrap();
    assert!(!again.created);
    assert_eq!(again.internal_key, 1);
}
