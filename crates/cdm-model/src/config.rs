//! Configuration options for a pipeline run.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Default number of rows per store batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default minimum interval between two progress signals.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// What the loader does when a target staging table already holds rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingDataPolicy {
    /// Stop and ask the operator to choose (fails the stage).
    #[default]
    Abort,
    /// Leave the existing rows alone and skip the file.
    Skip,
    /// Drop the table and load it again.
    Reload,
}

/// What the repair stage does with a row it cannot reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPolicy {
    /// Drop the row and count it in the stage summary.
    #[default]
    Skip,
    /// Fail the whole file.
    Abort,
}

/// Backing store selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum StoreBackend {
    /// In-process store; contents vanish with the process.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite(PathBuf),
}

impl FromStr for StoreBackend {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        match trimmed.split_once(':') {
            Some((scheme, path)) if scheme.eq_ignore_ascii_case("sqlite") && !path.is_empty() => {
                Ok(Self::Sqlite(PathBuf::from(path)))
            }
            _ => Err(ModelError::InvalidStoreBackend(value.to_string())),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
        }
    }
}

/// Snapshot of everything that shapes a pipeline run.
///
/// The snapshot is recorded in the checkpoint document and the validation
/// report so a resumed run can be compared with the run that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the `<entity>.csv` extracts.
    pub input_dir: PathBuf,
    /// Directory receiving repaired files and reports.
    pub processed_dir: PathBuf,
    /// Checkpoint document path.
    pub checkpoint_path: PathBuf,
    /// Rows per store batch.
    pub batch_size: usize,
    /// Upper bound on concurrently running workers.
    pub workers: usize,
    /// Discard the checkpoint and run every stage.
    pub force_restart: bool,
    pub on_existing: ExistingDataPolicy,
    pub on_repair_failure: RepairPolicy,
    /// Allow the last-resort proportional split when no anchor fits.
    pub proportional_fallback: bool,
    /// Optional Athena-style `CONCEPT.csv`.
    pub vocabulary: Option<PathBuf>,
    pub store: StoreBackend,
    /// Run the observation re-classification maintenance pass.
    pub reclassify: bool,
    /// Minimum time between two progress signals.
    #[serde(with = "duration_millis")]
    pub progress_interval: Duration,
    pub retry: RetrySettings,
    /// Allow raw row values in log output.
    #[serde(default)]
    pub log_data: bool,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        let input_dir = input_dir.into();
        let processed_dir = input_dir.join("processed");
        let checkpoint_path = processed_dir.join("checkpoint.json");
        Self {
            input_dir,
            processed_dir,
            checkpoint_path,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: default_workers(),
            force_restart: false,
            on_existing: ExistingDataPolicy::default(),
            on_repair_failure: RepairPolicy::default(),
            proportional_fallback: true,
            vocabulary: None,
            store: StoreBackend::default(),
            reclassify: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            retry: RetrySettings::default(),
            log_data: false,
        }
    }

    pub fn with_processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.processed_dir = dir.into();
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_force_restart(mut self, enable: bool) -> Self {
        self.force_restart = enable;
        self
    }

    pub fn with_on_existing(mut self, policy: ExistingDataPolicy) -> Self {
        self.on_existing = policy;
        self
    }

    pub fn with_repair_policy(mut self, policy: RepairPolicy) -> Self {
        self.on_repair_failure = policy;
        self
    }

    pub fn with_proportional_fallback(mut self, enable: bool) -> Self {
        self.proportional_fallback = enable;
        self
    }

    pub fn with_vocabulary(mut self, path: Option<PathBuf>) -> Self {
        self.vocabulary = path;
        self
    }

    pub fn with_store(mut self, store: StoreBackend) -> Self {
        self.store = store;
        self
    }

    pub fn with_reclassify(mut self, enable: bool) -> Self {
        self.reclassify = enable;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_log_data(mut self, enable: bool) -> Self {
        self.log_data = enable;
        self
    }
}

/// Retry settings for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// No retries; every failure is final.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_backend() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(
            "sqlite:/tmp/cdm.db".parse::<StoreBackend>().unwrap(),
            StoreBackend::Sqlite(PathBuf::from("/tmp/cdm.db"))
        );
        assert!("postgres://x".parse::<StoreBackend>().is_err());
        assert!("sqlite:".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let retry = RetrySettings::default();
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn defaults_derive_from_input_dir() {
        let config = PipelineConfig::new("/data/synthea").with_batch_size(0);
        assert_eq!(config.processed_dir, PathBuf::from("/data/synthea/processed"));
        assert_eq!(
            config.checkpoint_path,
            PathBuf::from("/data/synthea/processed/checkpoint.json")
        );
        assert_eq!(config.batch_size, 1);
        assert!(config.workers >= 1);
    }
}
