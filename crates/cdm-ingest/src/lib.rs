//! Source discovery, record repair and bulk staging loads.
//!
//! The flow for one extract is: [`discover_inputs`] finds it,
//! [`repair_file`] rewrites it with header arity on every row, and
//! [`BulkLoader`] copies the repaired rows into a staged text table.

pub mod discovery;
pub mod error;
pub mod loader;
pub mod progress;
pub mod reader;
pub mod repair;
pub mod writer;

pub use discovery::{InputInventory, discover_inputs, list_csv_files};
pub use error::{IngestError, Result};
pub use loader::{BulkLoader, LoadAction, LoadOptions, LoadReport};
pub use progress::{LineProgress, NoProgress, ProgressSink, Throttled, format_progress_line};
pub use reader::{SourceFile, SourceRow, read_source};
pub use repair::{
    FileRepairReport, RepairEngine, RepairError, RepairFailure, RepairOptions, RepairedRow,
    repair_file,
};
pub use writer::write_csv_atomic;
