//! `cdm-etl`: resumable Synthea to CDM pipeline.

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{ColorChoice, Parser};
use tracing::level_filters::LevelFilter;
use tracing::warn;

use cdm_cli::logging::{LogConfig, LogFormat, init_logging};
use cdm_model::CancellationToken;

mod cli;
mod commands;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::commands::{
    EXIT_CANCELLED, EXIT_OK, EXIT_STAGE_FAILED, run_pipeline, run_repair, run_status,
};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(EXIT_STAGE_FAILED);
    }
    let exit_code = match &cli.command {
        Command::Run(args) => {
            let cancel = CancellationToken::new();
            install_signal_handler(&cancel);
            run_pipeline(args, cancel)
        }
        Command::Status(args) => match run_status(args) {
            Ok(()) => EXIT_OK,
            Err(error) => {
                eprintln!("error: {error:#}");
                EXIT_STAGE_FAILED
            }
        },
        Command::Repair(args) => match run_repair(args) {
            Ok(_) => EXIT_OK,
            Err(error) => {
                eprintln!("error: {error:#}");
                EXIT_STAGE_FAILED
            }
        },
    };
    std::process::exit(exit_code);
}

/// First Ctrl-C cancels cooperatively; a second one exits immediately.
fn install_signal_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    let requested = AtomicBool::new(false);
    let result = ctrlc::set_handler(move || {
        if requested.swap(true, Ordering::SeqCst) {
            std::process::exit(EXIT_CANCELLED);
        }
        eprintln!("cancellation requested, finishing the current batch (press again to exit)");
        cancel.cancel();
    });
    if let Err(error) = result {
        warn!(%error, "could not install signal handler");
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
