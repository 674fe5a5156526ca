//! Bulk loading of repaired files into staged tables.

use std::path::{Path, PathBuf};
use std::time::Instant;

use csv::ReaderBuilder;
use serde::Serialize;
use tracing::{info, info_span, warn};

use cdm_model::{
    CancellationToken, DEFAULT_BATCH_SIZE, ExistingDataPolicy, PipelineConfig, Row, TableSchema,
    Value,
};
use cdm_store::Store;

use crate::error::{IngestError, Result};
use crate::progress::{NoProgress, ProgressSink};
use crate::reader::normalize_header;

static NO_PROGRESS: NoProgress = NoProgress;

/// Suffix of the single-row table naming the pipeline that staged a table.
const OWNER_SUFFIX: &str = "_owner";

/// Knobs for [`BulkLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub on_existing: ExistingDataPolicy,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_existing: ExistingDataPolicy::default(),
        }
    }
}

impl LoadOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            on_existing: config.on_existing,
        }
    }
}

/// What the loader did with a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadAction {
    Loaded,
    Reloaded,
    Skipped,
}

/// Before/after verification of one load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub source: Option<PathBuf>,
    pub action: LoadAction,
    /// Data rows in the source file.
    pub source_rows: u64,
    /// Rows the table held before the existing-data policy was applied.
    pub existing_rows: u64,
    /// Rows immediately before the first batch was written.
    pub pre_count: u64,
    pub post_count: u64,
    pub delta: u64,
    pub batches: u64,
}

impl LoadReport {
    /// Whether fewer rows arrived than the file holds.
    pub fn is_short(&self) -> bool {
        self.action != LoadAction::Skipped && self.delta < self.source_rows
    }
}

/// Moves repaired CSV files into staged text tables in batches.
pub struct BulkLoader<'a> {
    store: &'a dyn Store,
    options: LoadOptions,
    progress: &'a dyn ProgressSink,
    cancel: Option<&'a CancellationToken>,
    owner: Option<&'a str>,
}

impl<'a> BulkLoader<'a> {
    pub fn new(store: &'a dyn Store, options: LoadOptions) -> Self {
        Self {
            store,
            options,
            progress: &NO_PROGRESS,
            cancel: None,
            owner: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Claims every table this loader writes for `owner`.
    ///
    /// Rows left in a table by an earlier, unfinished load of the same
    /// owner are replaced instead of going through the existing-data
    /// policy, which then only guards tables staged by someone else.
    pub fn with_owner(mut self, owner: &'a str) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Loads a well-formed CSV file into `table`, creating it from the
    /// file header.
    pub fn load_file(&self, path: &Path, table: &str) -> Result<LoadReport> {
        let span = info_span!("load_file", table, path = %path.display());
        let _guard = span.enter();
        let start = Instant::now();

        let source_rows = count_rows(path)?;
        let existing_rows = self.count(table)?;
        let action = match self.apply_existing_policy(table, existing_rows)? {
            Some(action) => action,
            None => {
                info!(existing_rows, "table already loaded, skipping file");
                return Ok(LoadReport {
                    table: table.to_string(),
                    source: Some(path.to_path_buf()),
                    action: LoadAction::Skipped,
                    source_rows,
                    existing_rows,
                    pre_count: existing_rows,
                    post_count: existing_rows,
                    delta: 0,
                    batches: 0,
                });
            }
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| IngestError::csv(path, e))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|e| IngestError::csv(path, e))?
            .iter()
            .map(normalize_header)
            .collect();
        let schema = TableSchema::staging(table, &header);
        self.ensure_table(&schema)?;

        let pre_count = self.count(table)?;
        let batch_size = self.options.batch_size.max(1);
        let mut batch: Vec<Row> = Vec::with_capacity(batch_size);
        let mut loaded = 0u64;
        let mut batches = 0u64;

        for record in reader.records() {
            let record = record.map_err(|e| arity_or_csv(path, e))?;
            batch.push(record.iter().map(staged_value).collect());
            if batch.len() >= batch_size {
                loaded += self.flush(table, &mut batch, loaded)?;
                batches += 1;
                self.progress
                    .report(loaded, source_rows, &format!("loading {table}"));
            }
        }
        if !batch.is_empty() {
            loaded += self.flush(table, &mut batch, loaded)?;
            batches += 1;
            self.progress
                .report(loaded, source_rows, &format!("loading {table}"));
        }
        self.progress.finish(&format!("loaded {table}"));

        let post_count = self.count(table)?;
        let delta = post_count.saturating_sub(pre_count);
        let report = LoadReport {
            table: table.to_string(),
            source: Some(path.to_path_buf()),
            action,
            source_rows,
            existing_rows,
            pre_count,
            post_count,
            delta,
            batches,
        };
        if report.is_short() {
            warn!(
                source_rows,
                delta, "table grew by fewer rows than the source file holds"
            );
        }
        info!(
            pre_count,
            post_count,
            delta,
            batches,
            duration_ms = start.elapsed().as_millis(),
            "loaded table"
        );
        Ok(report)
    }

    /// Stages an empty table for an absent optional extract.
    pub fn stage_empty(&self, table: &str, columns: &[&str]) -> Result<LoadReport> {
        let existing_rows = self.count(table)?;
        let action = match self.apply_existing_policy(table, existing_rows)? {
            Some(action) => action,
            None => LoadAction::Skipped,
        };
        if action != LoadAction::Skipped {
            let header: Vec<String> = columns.iter().map(|name| (*name).to_string()).collect();
            self.ensure_table(&TableSchema::staging(table, &header))?;
        }
        let post_count = self.count(table)?;
        Ok(LoadReport {
            table: table.to_string(),
            source: None,
            action,
            source_rows: 0,
            existing_rows,
            pre_count: post_count,
            post_count,
            delta: 0,
            batches: 0,
        })
    }

    /// Returns the action to take, or `None` when the file must be skipped.
    fn apply_existing_policy(&self, table: &str, existing_rows: u64) -> Result<Option<LoadAction>> {
        let action = if existing_rows == 0 {
            LoadAction::Loaded
        } else if self.owned(table)? {
            info!(table, existing_rows, "replacing rows from an unfinished load");
            self.drop_target(table)?;
            LoadAction::Reloaded
        } else {
            match self.options.on_existing {
                ExistingDataPolicy::Abort => {
                    return Err(IngestError::TargetNotEmpty {
                        table: table.to_string(),
                        rows: existing_rows,
                    });
                }
                ExistingDataPolicy::Skip => return Ok(None),
                ExistingDataPolicy::Reload => {
                    info!(table, existing_rows, "dropping table for reload");
                    self.drop_target(table)?;
                    LoadAction::Reloaded
                }
            }
        };
        self.claim(table)?;
        Ok(Some(action))
    }

    /// Whether `table` was last staged by this loader's owner.
    fn owned(&self, table: &str) -> Result<bool> {
        let Some(owner) = self.owner else {
            return Ok(false);
        };
        let marker = owner_table(table);
        let exists = self
            .store
            .table_exists(&marker)
            .map_err(|e| IngestError::store(&marker, e))?;
        if !exists {
            return Ok(false);
        }
        let rows = self
            .store
            .scan(&marker)
            .map_err(|e| IngestError::store(&marker, e))?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_str)
            == Some(owner))
    }

    /// Records the owner before any row is written, so an interrupted load
    /// is still recognised.
    fn claim(&self, table: &str) -> Result<()> {
        let Some(owner) = self.owner else {
            return Ok(());
        };
        let marker = owner_table(table);
        let schema = TableSchema::staging(&marker, &["pipeline_id".to_string()]);
        let store_err = |e| IngestError::store(&marker, e);
        self.store.create_table(&schema).map_err(store_err)?;
        self.store.truncate(&marker).map_err(store_err)?;
        self.store
            .insert_batch(&marker, &[vec![Value::text(owner)]])
            .map_err(store_err)?;
        Ok(())
    }

    fn drop_target(&self, table: &str) -> Result<()> {
        self.store
            .drop_table(table)
            .map_err(|e| IngestError::store(table, e))
    }

    /// Creates the table, replacing an empty table whose columns differ.
    fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        let table = schema.name.as_str();
        let existing = self
            .store
            .table_schema(table)
            .map_err(|e| IngestError::store(table, e))?;
        if let Some(existing) = existing
            && existing != *schema
        {
            self.store
                .drop_table(table)
                .map_err(|e| IngestError::store(table, e))?;
        }
        self.store
            .create_table(schema)
            .map_err(|e| IngestError::store(table, e))
    }

    fn flush(&self, table: &str, batch: &mut Vec<Row>, loaded: u64) -> Result<u64> {
        if let Some(cancel) = self.cancel
            && cancel.is_cancelled()
        {
            return Err(IngestError::Cancelled {
                table: table.to_string(),
                loaded,
            });
        }
        let inserted = self
            .store
            .insert_batch(table, batch)
            .map_err(|e| IngestError::store(table, e))?;
        batch.clear();
        Ok(inserted as u64)
    }

    fn count(&self, table: &str) -> Result<u64> {
        self.store
            .count(table)
            .map_err(|e| IngestError::store(table, e))
    }
}

fn owner_table(table: &str) -> String {
    format!("{table}{OWNER_SUFFIX}")
}

fn staged_value(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else {
        Value::text(raw)
    }
}

fn count_rows(path: &Path) -> Result<u64> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| IngestError::csv(path, e))?;
    let mut rows = 0u64;
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| IngestError::csv(path, e))?
    {
        rows += 1;
    }
    Ok(rows)
}

fn arity_or_csv(path: &Path, error: csv::Error) -> IngestError {
    if let csv::ErrorKind::UnequalLengths {
        pos,
        expected_len,
        len,
    } = error.kind()
    {
        return IngestError::RowArity {
            path: path.to_path_buf(),
            line: pos.as_ref().map_or(0, csv::Position::line),
            expected: *expected_len as usize,
            actual: *len as usize,
        };
    }
    IngestError::csv(path, error)
}
