//! Library side of the `cdm-etl` binary: logging setup, progress sinks and
//! summary tables.

pub mod logging;
pub mod progress;
pub mod summary;
