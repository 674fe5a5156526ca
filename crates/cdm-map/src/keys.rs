//! Surrogate key mapping on top of the store's atomic assign primitive.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use cdm_model::EntityKind;
use cdm_store::{Store, StoreError};

use crate::error::{MapError, Result};

/// Consistency summary of one entity kind's mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyAudit {
    pub kind: EntityKind,
    pub mappings: u64,
    /// Last value drawn from the kind's counter.
    pub counter: i64,
}

impl KeyAudit {
    /// The counter advanced by exactly the number of distinct external keys.
    pub fn is_consistent(&self) -> bool {
        self.counter >= 0 && self.counter as u64 == self.mappings
    }
}

#[derive(Debug, Default)]
struct KindCache {
    keys: HashMap<String, i64>,
    preloaded: bool,
}

/// Assigns stable integer keys to external string identifiers.
///
/// Atomicity comes from [`Store::assign_key`] and [`Store::assign_keys`];
/// the mapper adds a read-through cache and cross-checks every answer the
/// store gives against what it has already seen.
pub struct KeyMapper {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<EntityKind, KindCache>>,
}

impl KeyMapper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Returns the internal key for `external_key`, creating it on first use.
    pub fn assign(&self, kind: EntityKind, external_key: &str) -> Result<i64> {
        if let Some(key) = self.cached(kind, external_key) {
            return Ok(key);
        }
        let assignment = self
            .store
            .assign_key(kind, external_key)
            .map_err(|e| MapError::store("assign_key", kind, e))?;
        self.record(kind, external_key, assignment.internal_key)?;
        Ok(assignment.internal_key)
    }

    /// Bulk [`KeyMapper::assign`]; results follow the input order.
    pub fn assign_many(&self, kind: EntityKind, external_keys: &[String]) -> Result<Vec<i64>> {
        let hits: Vec<Option<i64>> = external_keys
            .iter()
            .map(|key| self.cached(kind, key))
            .collect();
        let mut seen = HashSet::new();
        let misses: Vec<String> = external_keys
            .iter()
            .zip(&hits)
            .filter(|(key, hit)| hit.is_none() && seen.insert(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        let mut fresh: HashMap<&str, i64> = HashMap::with_capacity(misses.len());
        if !misses.is_empty() {
            let assignments = self
                .store
                .assign_keys(kind, &misses)
                .map_err(|e| MapError::store("assign_keys", kind, e))?;
            if assignments.len() != misses.len() {
                return Err(MapError::store(
                    "assign_keys",
                    kind,
                    StoreError::Backend {
                        message: format!(
                            "{} assignments returned for {} keys",
                            assignments.len(),
                            misses.len()
                        ),
                    },
                ));
            }
            let created = assignments.iter().filter(|a| a.created).count();
            for (key, assignment) in misses.iter().zip(&assignments) {
                self.record(kind, key, assignment.internal_key)?;
                fresh.insert(key.as_str(), assignment.internal_key);
            }
            debug!(%kind, requested = misses.len(), created, "assigned key batch");
        }

        Ok(hits
            .into_iter()
            .zip(external_keys)
            .map(|(hit, key)| hit.unwrap_or_else(|| fresh[key.as_str()]))
            .collect())
    }

    /// Looks up an existing key without creating one.
    pub fn lookup(&self, kind: EntityKind, external_key: &str) -> Result<Option<i64>> {
        if !self.is_preloaded(kind) {
            self.preload(kind)?;
        }
        Ok(self.cached(kind, external_key))
    }

    /// Loads every stored mapping of `kind` into the cache, checking that
    /// the table is a bijection and agrees with earlier answers.
    pub fn preload(&self, kind: EntityKind) -> Result<usize> {
        let mappings = self
            .store
            .key_mappings(kind)
            .map_err(|e| MapError::store("key_mappings", kind, e))?;
        let mut by_internal: HashMap<i64, &str> = HashMap::with_capacity(mappings.len());
        for mapping in &mappings {
            if let Some(first) = by_internal.insert(mapping.internal_key, &mapping.external_key) {
                return Err(MapError::DuplicateInternalKey {
                    kind,
                    internal_key: mapping.internal_key,
                    first: first.to_string(),
                    second: mapping.external_key.clone(),
                });
            }
            self.record(kind, &mapping.external_key, mapping.internal_key)?;
        }
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.entry(kind).or_default().preloaded = true;
        info!(%kind, mappings = mappings.len(), "preloaded key mappings");
        Ok(mappings.len())
    }

    /// Compares the stored mapping count with the kind's counter.
    pub fn audit(&self, kind: EntityKind) -> Result<KeyAudit> {
        let mappings = self
            .store
            .mapping_count(kind)
            .map_err(|e| MapError::store("mapping_count", kind, e))?;
        let counter = self
            .store
            .current_value(&kind.counter_name())
            .map_err(|e| MapError::store("current_value", kind, e))?;
        Ok(KeyAudit {
            kind,
            mappings,
            counter,
        })
    }

    /// Removes every mapping of `kind` from the store and the cache.
    ///
    /// Only valid between independent full reloads.
    pub fn reset(&self, kind: EntityKind) -> Result<()> {
        self.store
            .truncate_mappings(kind)
            .map_err(|e| MapError::store("truncate_mappings", kind, e))?;
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.remove(&kind);
        Ok(())
    }

    fn cached(&self, kind: EntityKind, external_key: &str) -> Option<i64> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(&kind)?.keys.get(external_key).copied()
    }

    fn is_preloaded(&self, kind: EntityKind) -> bool {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(&kind).is_some_and(|entry| entry.preloaded)
    }

    fn record(&self, kind: EntityKind, external_key: &str, internal_key: i64) -> Result<()> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let keys = &mut cache.entry(kind).or_default().keys;
        match keys.get(external_key) {
            Some(&existing) if existing != internal_key => Err(MapError::MappingConflict {
                kind,
                external_key: external_key.to_string(),
                existing,
                observed: internal_key,
            }),
            Some(_) => Ok(()),
            None => {
                keys.insert(external_key.to_string(), internal_key);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cdm_store::MemoryStore;

    use super::*;

    fn mapper() -> KeyMapper {
        KeyMapper::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn assign_is_idempotent() {
        let mapper = mapper();
        let first = mapper.assign(EntityKind::Subject, "p-1").unwrap();
        let again = mapper.assign(EntityKind::Subject, "p-1").unwrap();
        let other = mapper.assign(EntityKind::Subject, "p-2").unwrap();
        assert_eq!((first, again, other), (1, 1, 2));
        assert!(mapper.audit(EntityKind::Subject).unwrap().is_consistent());
    }

    #[test]
    fn kinds_have_independent_counters() {
        let mapper = mapper();
        assert_eq!(mapper.assign(EntityKind::Subject, "x").unwrap(), 1);
        assert_eq!(mapper.assign(EntityKind::Encounter, "x").unwrap(), 1);
    }

    #[test]
    fn assign_many_matches_single_assignment() {
        let mapper = mapper();
        mapper.assign(EntityKind::Provider, "b").unwrap();
        let keys: Vec<String> = ["a", "b", "c", "a"].map(String::from).to_vec();
        assert_eq!(
            mapper.assign_many(EntityKind::Provider, &keys).unwrap(),
            vec![2, 1, 3, 2]
        );
        assert_eq!(mapper.audit(EntityKind::Provider).unwrap().mappings, 3);
    }

    #[test]
    fn lookup_never_creates() {
        let mapper = mapper();
        mapper.assign(EntityKind::Subject, "known").unwrap();
        let fresh = KeyMapper::new(Arc::clone(mapper.store()));
        assert_eq!(fresh.lookup(EntityKind::Subject, "known").unwrap(), Some(1));
        assert_eq!(fresh.lookup(EntityKind::Subject, "unknown").unwrap(), None);
        assert_eq!(fresh.audit(EntityKind::Subject).unwrap().mappings, 1);
    }

    #[test]
    fn preload_detects_diverging_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mapper = KeyMapper::new(Arc::clone(&store));
        mapper.assign(EntityKind::Subject, "x").unwrap();

        // Rebuild the table behind the mapper's back.
        store.truncate_mappings(EntityKind::Subject).unwrap();
        store.assign_key(EntityKind::Subject, "y").unwrap();
        store.assign_key(EntityKind::Subject, "x").unwrap();

        let err = mapper.preload(EntityKind::Subject).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            err,
            MapError::MappingConflict {
                existing: 1,
                observed: 2,
                ..
            }
        ));
    }
}
