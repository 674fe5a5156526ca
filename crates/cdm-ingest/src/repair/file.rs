//! Whole-file repair: read, calibrate, repair every row, write atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use cdm_model::{PipelineConfig, RepairPolicy};

use super::{RepairEngine, RepairFailure, RowProfile};
use crate::error::{IngestError, Result};
use crate::progress::ProgressSink;
use crate::reader::read_source;
use crate::writer::write_csv_atomic;

/// Number of failures kept verbatim in a report.
const FAILURE_SAMPLE_LIMIT: usize = 20;

/// Knobs for [`repair_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    pub policy: RepairPolicy,
    pub proportional_fallback: bool,
    /// Include raw row text in failure logs.
    pub log_data: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            policy: RepairPolicy::Skip,
            proportional_fallback: true,
            log_data: false,
        }
    }
}

impl RepairOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            policy: config.on_repair_failure,
            proportional_fallback: config.proportional_fallback,
            log_data: config.log_data,
        }
    }

    pub fn with_log_data(mut self, enable: bool) -> Self {
        self.log_data = enable;
        self
    }
}

/// Outcome of repairing one source file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileRepairReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows_read: u64,
    pub rows_written: u64,
    pub well_formed: u64,
    pub repaired: u64,
    pub skipped: u64,
    /// Rows produced per strategy name.
    pub by_strategy: BTreeMap<String, u64>,
    /// First failures, for the stage summary.
    pub failures: Vec<RepairFailure>,
}

/// Repairs every data row of `input` and writes a well-formed copy to
/// `output`.
///
/// Expected lengths are calibrated from the file's own well-formed rows
/// before any row is repaired. With [`RepairPolicy::Skip`] unrecoverable
/// rows are dropped and counted; with [`RepairPolicy::Abort`] the first one
/// fails the file and nothing is written.
pub fn repair_file(
    input: &Path,
    output: &Path,
    options: &RepairOptions,
    progress: &dyn ProgressSink,
) -> Result<FileRepairReport> {
    let span = info_span!("repair_file", path = %input.display());
    let _guard = span.enter();
    let start = Instant::now();

    let source = read_source(input)?;
    let mut profile = RowProfile::from_header(&source.header);
    profile.calibrate(source.rows.iter().map(|row| row.fields.as_slice()));
    let engine = RepairEngine::new(profile, options.proportional_fallback);

    let total = source.rows.len() as u64;
    let mut report = FileRepairReport {
        source: input.to_path_buf(),
        output: output.to_path_buf(),
        rows_read: total,
        ..FileRepairReport::default()
    };
    let mut repaired_rows = Vec::with_capacity(source.rows.len());

    for (idx, row) in source.rows.iter().enumerate() {
        match engine.repair_line(row.line, &row.fields) {
            Ok(repaired) => {
                if repaired.was_repaired() {
                    report.repaired += 1;
                } else {
                    report.well_formed += 1;
                }
                *report
                    .by_strategy
                    .entry(repaired.strategy.to_string())
                    .or_default() += 1;
                repaired_rows.push(repaired.values);
            }
            Err(failure) => {
                if options.log_data {
                    warn!(
                        line = failure.line,
                        raw = %failure.raw,
                        reason = %failure.reason,
                        "unrecoverable row"
                    );
                } else {
                    warn!(line = failure.line, reason = %failure.reason, "unrecoverable row");
                }
                if options.policy == RepairPolicy::Abort {
                    return Err(IngestError::RepairAborted {
                        path: input.to_path_buf(),
                        failure: Box::new(failure),
                    });
                }
                report.skipped += 1;
                if report.failures.len() < FAILURE_SAMPLE_LIMIT {
                    report.failures.push(failure);
                }
            }
        }
        progress.report(idx as u64 + 1, total, "repairing rows");
    }

    report.rows_written = write_csv_atomic(output, &source.header, &repaired_rows)?;
    progress.finish("repair complete");
    debug!(strategies = ?report.by_strategy, "strategy usage");
    info!(
        rows = report.rows_read,
        repaired = report.repaired,
        skipped = report.skipped,
        duration_ms = start.elapsed().as_millis(),
        "repaired file"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::progress::NoProgress;

    const ID: &str = "0b5b2fe1-0c7e-4c5d-9c1b-4a2f0e3c9d11";
    const PATIENT: &str = "1d604da9-9a81-4ba9-80c2-de3375d59b40";

    #[test]
    fn repairs_and_skips_rows() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("encounters.csv");
        let output = dir.path().join("processed").join("encounters.csv");
        fs::write(
            &input,
            format!(
                "id,start,stop,patient\n\
                 {ID},2020-01-01,2020-01-02,{PATIENT}\n\
                 {ID}2020-01-012020-01-02{PATIENT}\n\
                 a,b,c,d,e\n"
            ),
        )
        .unwrap();

        let report = repair_file(&input, &output, &RepairOptions::default(), &NoProgress).unwrap();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.well_formed, 1);
        assert_eq!(report.repaired, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].line, 4);

        let written = fs::read_to_string(&output).unwrap();
        let expected_row = format!("{ID},2020-01-01,2020-01-02,{PATIENT}");
        assert_eq!(
            written,
            format!("id,start,stop,patient\n{expected_row}\n{expected_row}\n")
        );
    }

    #[test]
    fn abort_policy_fails_without_writing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("patients.csv");
        let output = dir.path().join("out.csv");
        fs::write(&input, "a,b\n1,2,3\n").unwrap();
        let options = RepairOptions {
            policy: RepairPolicy::Abort,
            ..RepairOptions::default()
        };
        let err = repair_file(&input, &output, &options, &NoProgress).unwrap_err();
        assert!(matches!(err, IngestError::RepairAborted { .. }));
        assert!(!output.exists());
    }
}
