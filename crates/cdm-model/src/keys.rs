use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// A persisted surrogate key assignment.
///
/// Mappings are immutable: once an external key has an internal key under a
/// given kind, the pair never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    pub kind: EntityKind,
    pub external_key: String,
    pub internal_key: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single assign call against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAssignment {
    pub internal_key: i64,
    /// True when this call drew a new counter value and inserted the mapping.
    pub created: bool,
}

impl KeyAssignment {
    pub fn existing(internal_key: i64) -> Self {
        Self {
            internal_key,
            created: false,
        }
    }

    pub fn created(internal_key: i64) -> Self {
        Self {
            internal_key,
            created: true,
        }
    }
}
