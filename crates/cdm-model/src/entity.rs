//! Entity kinds for surrogate keys and source extract files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Kind of entity that receives a surrogate integer key.
///
/// Each kind owns an independent counter and mapping table, so the same
/// external key may map to different internal keys under different kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A patient (`person_id`).
    Subject,
    /// An encounter (`visit_occurrence_id`).
    Encounter,
    /// A clinician (`provider_id`).
    Provider,
    /// An organization (`care_site_id`).
    Facility,
    /// A non-numeric clinical observation (`observation_id`).
    Observation,
    /// A numeric clinical observation (`measurement_id`).
    Measurement,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Subject,
        EntityKind::Encounter,
        EntityKind::Provider,
        EntityKind::Facility,
        EntityKind::Observation,
        EntityKind::Measurement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Encounter => "encounter",
            Self::Provider => "provider",
            Self::Facility => "facility",
            Self::Observation => "observation",
            Self::Measurement => "measurement",
        }
    }

    /// Name of the store counter backing this kind.
    pub fn counter_name(self) -> String {
        format!("key_{}", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| ModelError::UnknownEntityKind(value.to_string()))
    }
}

/// A source extract file produced by the synthetic-data generator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceEntity {
    Patients,
    Encounters,
    Organizations,
    Providers,
    Conditions,
    Medications,
    Procedures,
    Observations,
}

impl SourceEntity {
    pub const ALL: [SourceEntity; 8] = [
        SourceEntity::Patients,
        SourceEntity::Encounters,
        SourceEntity::Organizations,
        SourceEntity::Providers,
        SourceEntity::Conditions,
        SourceEntity::Medications,
        SourceEntity::Procedures,
        SourceEntity::Observations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patients => "patients",
            Self::Encounters => "encounters",
            Self::Organizations => "organizations",
            Self::Providers => "providers",
            Self::Conditions => "conditions",
            Self::Medications => "medications",
            Self::Procedures => "procedures",
            Self::Observations => "observations",
        }
    }

    /// Expected file name inside the input directory (`<entity>.csv`).
    pub fn file_name(self) -> String {
        format!("{}.csv", self.as_str())
    }

    /// Staged (text-only) table holding this entity's raw rows.
    pub fn staging_table(self) -> String {
        format!("stg_{}", self.as_str())
    }

    /// Whether the pipeline cannot run without this file.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Patients | Self::Encounters)
    }

    /// Columns the domain transforms read from the staged table.
    ///
    /// An absent optional extract is staged as an empty table with exactly
    /// these columns.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Patients => &[
                "Id",
                "BIRTHDATE",
                "DEATHDATE",
                "RACE",
                "ETHNICITY",
                "GENDER",
            ],
            Self::Encounters => &[
                "Id",
                "START",
                "STOP",
                "PATIENT",
                "ORGANIZATION",
                "PROVIDER",
                "ENCOUNTERCLASS",
                "CODE",
                "DESCRIPTION",
            ],
            Self::Organizations => &["Id", "NAME", "ADDRESS", "CITY", "STATE", "ZIP"],
            Self::Providers => &["Id", "ORGANIZATION", "NAME", "GENDER", "SPECIALITY"],
            Self::Conditions | Self::Medications | Self::Procedures => &[
                "START",
                "STOP",
                "PATIENT",
                "ENCOUNTER",
                "CODE",
                "DESCRIPTION",
            ],
            Self::Observations => &[
                "DATE",
                "PATIENT",
                "ENCOUNTER",
                "CODE",
                "DESCRIPTION",
                "VALUE",
                "UNITS",
                "TYPE",
            ],
        }
    }
}

impl fmt::Display for SourceEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceEntity {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_lowercase();
        let key = key.strip_suffix(".csv").unwrap_or(&key);
        Self::ALL
            .into_iter()
            .find(|entity| entity.as_str() == key)
            .ok_or_else(|| ModelError::UnknownSourceEntity(value.to_string()))
    }
}
