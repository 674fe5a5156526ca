//! Domain transforms for the CDM pipeline.
//!
//! Staged text tables are turned into normalized tables by
//! [`DomainTransform`] implementations looked up in a
//! [`TransformRegistry`]. Every transform rewrites its targets from
//! scratch, so re-running one after a failure is safe.

pub mod context;
pub mod dates;
pub mod domain;
pub mod domains;
pub mod error;
pub mod keys;
pub mod report;
pub mod schema;
pub mod staged;
pub mod validate;
pub mod writer;

pub use context::TransformContext;
pub use domain::{DomainTransform, TransformRegistry};
pub use error::{Result, TransformError};
pub use keys::{KEYED_SOURCES, KeyBootstrapReport, bootstrap_keys};
pub use report::TransformReport;
pub use schema::{TARGET_TABLES, target_schema};
pub use staged::{StagedRow, StagedTable};
pub use validate::{VALIDATION_REPORT_FILE, ValidationReport, validate, write_report};
