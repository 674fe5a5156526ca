//! Shared data model for the clinical CDM ETL pipeline.

pub mod cancel;
pub mod concept;
pub mod config;
pub mod entity;
pub mod error;
pub mod keys;
pub mod observation;
pub mod record;
pub mod value;

pub use cancel::CancellationToken;
pub use concept::{ConceptDomain, ConceptMapping, EHR_TYPE_CONCEPT_ID, UNMAPPED_CONCEPT_ID};
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_PROGRESS_INTERVAL, ExistingDataPolicy, PipelineConfig,
    RepairPolicy, RetrySettings, StoreBackend,
};
pub use entity::{EntityKind, SourceEntity};
pub use error::{ModelError, Result};
pub use keys::{KeyAssignment, KeyMapping};
pub use observation::{ClassifiedObservation, ObservationClass, ObservationValue};
pub use record::RawRecord;
pub use value::{ColumnDef, ColumnType, Row, TableSchema, Value};
