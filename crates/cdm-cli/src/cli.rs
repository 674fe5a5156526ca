//! CLI argument definitions for `cdm-etl`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colorchoice_clap::Color;

use cdm_model::{DEFAULT_BATCH_SIZE, StoreBackend};

#[derive(Parser)]
#[command(
    name = "cdm-etl",
    version,
    about = "Resumable Synthea CSV to CDM pipeline",
    long_about = "Repair, stage, key and transform Synthea CSV extracts into a \
                  normalized clinical data model.\n\n\
                  Completed stages are recorded in a checkpoint file; running the \
                  same command again continues after the last completed stage."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for warnings only).
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for humans, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run (or resume) the pipeline over an input directory.
    Run(RunArgs),

    /// Print the checkpoint of a pipeline without running anything.
    Status(StatusArgs),

    /// Repair a single CSV file.
    Repair(RepairArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Directory containing the <entity>.csv extracts.
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Directory for repaired files and reports (default: <INPUT_DIR>/processed).
    #[arg(long = "processed-dir", value_name = "DIR")]
    pub processed_dir: Option<PathBuf>,

    /// Checkpoint file (default: <PROCESSED_DIR>/checkpoint.json).
    #[arg(long = "checkpoint", value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Rows per store batch.
    #[arg(long = "batch-size", value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Worker threads (default: available parallelism).
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Ignore the checkpoint and run every stage.
    #[arg(long = "force-restart")]
    pub force_restart: bool,

    /// Reload staged tables that already hold rows (same as --on-existing reload).
    #[arg(long = "force-reload", conflicts_with = "on_existing")]
    pub force_reload: bool,

    /// What to do when a staged table already holds rows.
    #[arg(long = "on-existing", value_enum, default_value = "abort")]
    pub on_existing: OnExistingArg,

    /// What to do with rows that cannot be repaired.
    #[arg(long = "on-repair-failure", value_enum, default_value = "skip")]
    pub on_repair_failure: RepairPolicyArg,

    /// Never split fused text by column proportions.
    #[arg(long = "no-proportional-fallback")]
    pub no_proportional_fallback: bool,

    /// Athena-style CONCEPT.csv used for concept mapping.
    #[arg(long = "vocabulary", value_name = "PATH")]
    pub vocabulary: Option<PathBuf>,

    /// Store backend: memory or sqlite:<path> (default: sqlite:<PROCESSED_DIR>/cdm.sqlite).
    #[arg(long = "store", value_name = "BACKEND")]
    pub store: Option<StoreBackend>,

    /// Move numeric-looking text observations into the measurement table.
    #[arg(long = "reclassify")]
    pub reclassify: bool,

    /// Where progress lines go.
    #[arg(long = "progress", value_enum, default_value = "stdout")]
    pub progress: ProgressArg,

    /// Minimum milliseconds between two progress lines.
    #[arg(long = "progress-interval-ms", value_name = "MS", default_value_t = 1000)]
    pub progress_interval_ms: u64,

    /// Retries for transient store errors.
    #[arg(long = "max-retries", value_name = "N")]
    pub max_retries: Option<u32>,

    /// Allow raw row values in logs (may expose patient data).
    #[arg(long = "log-data")]
    pub log_data: bool,

    /// Print the run report as JSON instead of a table.
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Input directory of the pipeline (default: current directory).
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: Option<PathBuf>,

    /// Checkpoint file (default: <INPUT_DIR>/processed/checkpoint.json).
    #[arg(long = "checkpoint", value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Print the raw checkpoint document.
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args)]
pub struct RepairArgs {
    /// CSV file to repair.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output path (default: <FILE stem>.repaired.csv next to FILE).
    #[arg(long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Fail on the first row that cannot be repaired.
    #[arg(long = "on-repair-failure", value_enum, default_value = "skip")]
    pub on_repair_failure: RepairPolicyArg,

    /// Never split fused text by column proportions.
    #[arg(long = "no-proportional-fallback")]
    pub no_proportional_fallback: bool,

    /// Allow raw row values in logs.
    #[arg(long = "log-data")]
    pub log_data: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OnExistingArg {
    Abort,
    Skip,
    Reload,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RepairPolicyArg {
    Skip,
    Abort,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProgressArg {
    Stdout,
    Stderr,
    Bar,
    Off,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
