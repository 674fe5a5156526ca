use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use cdm_core::{
    CheckpointFile, FailureKind, Orchestrator, PipelineError, RunReport, RunState,
};
use cdm_ingest::{FileRepairReport, NoProgress, RepairOptions, repair_file};
use cdm_model::{
    CancellationToken, ExistingDataPolicy, PipelineConfig, RepairPolicy, RetrySettings,
    StoreBackend,
};

use cdm_cli::progress::{ProgressMode, progress_sink};
use cdm_cli::summary::{print_repair_report, print_run_summary, print_status};

use crate::cli::{OnExistingArg, ProgressArg, RepairArgs, RepairPolicyArg, RunArgs, StatusArgs};

pub const EXIT_OK: i32 = 0;
pub const EXIT_STAGE_FAILED: i32 = 1;
pub const EXIT_PRECONDITION: i32 = 3;
pub const EXIT_CANCELLED: i32 = 130;

/// File name of the default SQLite store inside the processed directory.
const STORE_FILE: &str = "cdm.sqlite";

pub fn run_pipeline(args: &RunArgs, cancel: CancellationToken) -> i32 {
    let config = pipeline_config(args);
    let progress = progress_sink(
        progress_mode(args.progress),
        Duration::from_millis(args.progress_interval_ms),
    );
    let result = Orchestrator::from_config(config, progress, cancel)
        .and_then(|orchestrator| orchestrator.run());
    match result {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(error) => eprintln!("error: failed to serialize run report: {error}"),
                }
            } else {
                print_run_summary(&report);
            }
            report_exit_code(&report)
        }
        Err(error) => {
            eprintln!("error: {error}");
            error_exit_code(&error)
        }
    }
}

/// Translates run arguments into a pipeline configuration.
pub fn pipeline_config(args: &RunArgs) -> PipelineConfig {
    let processed_dir = args
        .processed_dir
        .clone()
        .unwrap_or_else(|| args.input_dir.join("processed"));
    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| processed_dir.join("checkpoint.json"));
    let store = args
        .store
        .clone()
        .unwrap_or_else(|| StoreBackend::Sqlite(processed_dir.join(STORE_FILE)));
    let on_existing = if args.force_reload {
        ExistingDataPolicy::Reload
    } else {
        match args.on_existing {
            OnExistingArg::Abort => ExistingDataPolicy::Abort,
            OnExistingArg::Skip => ExistingDataPolicy::Skip,
            OnExistingArg::Reload => ExistingDataPolicy::Reload,
        }
    };

    let mut config = PipelineConfig::new(&args.input_dir)
        .with_processed_dir(processed_dir)
        .with_checkpoint_path(checkpoint)
        .with_batch_size(args.batch_size)
        .with_force_restart(args.force_restart)
        .with_on_existing(on_existing)
        .with_repair_policy(repair_policy(args.on_repair_failure))
        .with_proportional_fallback(!args.no_proportional_fallback)
        .with_vocabulary(args.vocabulary.clone())
        .with_store(store)
        .with_reclassify(args.reclassify)
        .with_progress_interval(Duration::from_millis(args.progress_interval_ms))
        .with_log_data(args.log_data);
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(max_retries) = args.max_retries {
        config = config.with_retry(RetrySettings {
            max_retries,
            ..RetrySettings::default()
        });
    }
    config
}

pub fn report_exit_code(report: &RunReport) -> i32 {
    match report.state {
        RunState::Completed => EXIT_OK,
        RunState::Aborted => EXIT_CANCELLED,
        _ => match report.failure.as_ref().map(|failure| failure.kind) {
            Some(FailureKind::Precondition) => EXIT_PRECONDITION,
            Some(FailureKind::Cancelled) => EXIT_CANCELLED,
            _ => EXIT_STAGE_FAILED,
        },
    }
}

pub fn error_exit_code(error: &PipelineError) -> i32 {
    match error {
        PipelineError::Precondition(_) | PipelineError::Vocabulary(_) => EXIT_PRECONDITION,
        _ => EXIT_STAGE_FAILED,
    }
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let path = args.checkpoint.clone().unwrap_or_else(|| {
        args.input_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("processed")
            .join("checkpoint.json")
    });
    let file = CheckpointFile::new(&path);
    let Some(state) = file
        .load()
        .with_context(|| format!("reading {}", path.display()))?
    else {
        println!("No checkpoint at {}", path.display());
        return Ok(());
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_status(&state);
    }
    Ok(())
}

pub fn run_repair(args: &RepairArgs) -> Result<FileRepairReport> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| repaired_path(&args.file));
    let options = RepairOptions {
        policy: repair_policy(args.on_repair_failure),
        proportional_fallback: !args.no_proportional_fallback,
        log_data: args.log_data,
    };
    let report = repair_file(&args.file, &output, &options, &NoProgress)
        .with_context(|| format!("repairing {}", args.file.display()))?;
    info!(output = %output.display(), "repaired file written");
    print_repair_report(&report);
    Ok(report)
}

/// `dir/name.csv` becomes `dir/name.repaired.csv`.
pub fn repaired_path(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    file.with_file_name(format!("{stem}.repaired.csv"))
}

fn repair_policy(arg: RepairPolicyArg) -> RepairPolicy {
    match arg {
        RepairPolicyArg::Skip => RepairPolicy::Skip,
        RepairPolicyArg::Abort => RepairPolicy::Abort,
    }
}

fn progress_mode(arg: ProgressArg) -> ProgressMode {
    match arg {
        ProgressArg::Stdout => ProgressMode::Stdout,
        ProgressArg::Stderr => ProgressMode::Stderr,
        ProgressArg::Bar => ProgressMode::Bar,
        ProgressArg::Off => ProgressMode::Off,
    }
}
