//! Terminal tables for run reports, checkpoint status and file repairs.

use std::collections::BTreeMap;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use cdm_core::{CheckpointState, RunReport, RunState, StageStatus, standard_plan};
use cdm_ingest::FileRepairReport;

pub fn print_run_summary(report: &RunReport) {
    println!("Pipeline: {}", report.pipeline_id);
    println!("Checkpoint: {}", report.checkpoint.display());
    println!("{}", run_table(report));
    println!(
        "Run {} in {:.1}s",
        report.state.as_str(),
        report.duration_seconds
    );
    if let Some(failure) = &report.failure {
        eprintln!(
            "Stage {} failed ({}): {}",
            failure.stage,
            failure.kind.as_str(),
            failure.reason
        );
    }
}

/// One row per planned stage.
pub fn run_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("Status"),
        header_cell("Rows"),
        header_cell("Seconds"),
        header_cell("Counters"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    align_column(&mut table, 3, CellAlignment::Right);
    for stage in &report.stages {
        table.add_row(vec![
            Cell::new(&stage.name).add_attribute(Attribute::Bold),
            status_cell(stage.status),
            optional_cell(stage.rows),
            seconds_cell(stage.status, stage.duration_seconds),
            counters_cell(&stage.counters),
        ]);
    }
    let rows: u64 = report
        .executed()
        .filter_map(|stage| stage.rows)
        .sum();
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        state_cell(report.state),
        Cell::new(rows).add_attribute(Attribute::Bold),
        Cell::new(format!("{:.1}", report.duration_seconds)),
        dim_cell("-"),
    ]);
    table
}

pub fn print_status(state: &CheckpointState) {
    println!(
        "Pipeline: {}",
        state.pipeline_id.as_deref().unwrap_or("unknown")
    );
    if let Some(updated) = state.last_updated {
        println!("Last updated: {}", updated.to_rfc3339());
    }
    println!("{}", status_table(state));
}

/// Checkpoint contents in plan order; stages never attempted show as
/// pending.
pub fn status_table(state: &CheckpointState) -> Table {
    let mut names: Vec<String> = match &state.config {
        Some(config) => standard_plan(config)
            .stage_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    for name in state.stats.keys().chain(state.failures.keys()) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("State"),
        header_cell("Rows"),
        header_cell("Seconds"),
        header_cell("Detail"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    align_column(&mut table, 3, CellAlignment::Right);
    for name in &names {
        let row = if let Some(stats) = state
            .stats
            .get(name)
            .filter(|_| state.is_completed(name))
        {
            vec![
                Cell::new(name).add_attribute(Attribute::Bold),
                Cell::new("completed").fg(Color::Green),
                Cell::new(stats.rows),
                Cell::new(format!("{:.2}", stats.duration_seconds)),
                Cell::new(stats.completed_at.to_rfc3339()),
            ]
        } else if let Some(failure) = state.failures.get(name) {
            vec![
                Cell::new(name).add_attribute(Attribute::Bold),
                Cell::new("failed").fg(Color::Red),
                dim_cell("-"),
                dim_cell("-"),
                Cell::new(format!("{}: {}", failure.kind.as_str(), failure.reason)),
            ]
        } else {
            vec![
                Cell::new(name).add_attribute(Attribute::Bold),
                dim_cell("pending"),
                dim_cell("-"),
                dim_cell("-"),
                dim_cell("-"),
            ]
        };
        table.add_row(row);
    }
    table
}

pub fn print_repair_report(report: &FileRepairReport) {
    println!("Source: {}", report.source.display());
    println!("Output: {}", report.output.display());
    println!("{}", repair_table(report));
    for failure in &report.failures {
        eprintln!("- line {}: {}", failure.line, failure.reason);
    }
}

pub fn repair_table(report: &FileRepairReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Rows"), header_cell("Count")]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    let mut add = |label: String, value: u64| {
        table.add_row(vec![Cell::new(label), count_cell(value)]);
    };
    add("read".to_string(), report.rows_read);
    add("well formed".to_string(), report.well_formed);
    add("repaired".to_string(), report.repaired);
    add("skipped".to_string(), report.skipped);
    for (strategy, rows) in &report.by_strategy {
        add(format!("  via {strategy}"), *rows);
    }
    add("written".to_string(), report.rows_written);
    table
}

/// `name=value` pairs, non-zero values only.
pub fn format_counters(counters: &BTreeMap<String, u64>) -> String {
    let pairs: Vec<String> = counters
        .iter()
        .filter(|(_, value)| **value > 0)
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    if pairs.is_empty() {
        "-".to_string()
    } else {
        pairs.join(", ")
    }
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn status_cell(status: StageStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        StageStatus::Completed => cell.fg(Color::Green),
        StageStatus::Skipped => cell.fg(Color::Blue),
        StageStatus::Failed => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        StageStatus::NotRun => cell.fg(Color::DarkGrey),
    }
}

fn state_cell(state: RunState) -> Cell {
    let cell = Cell::new(state.as_str()).add_attribute(Attribute::Bold);
    match state {
        RunState::Completed => cell.fg(Color::Green),
        RunState::Failed => cell.fg(Color::Red),
        RunState::Aborted => cell.fg(Color::Yellow),
        RunState::Pending | RunState::Running => cell,
    }
}

fn seconds_cell(status: StageStatus, seconds: f64) -> Cell {
    match status {
        StageStatus::NotRun => dim_cell("-"),
        _ => Cell::new(format!("{seconds:.2}")),
    }
}

fn optional_cell(value: Option<u64>) -> Cell {
    match value {
        Some(value) => Cell::new(value),
        None => dim_cell("-"),
    }
}

fn counters_cell(counters: &BTreeMap<String, u64>) -> Cell {
    let text = format_counters(counters);
    if text == "-" {
        dim_cell(text)
    } else {
        Cell::new(text)
    }
}

fn count_cell(value: u64) -> Cell {
    if value > 0 {
        Cell::new(value)
    } else {
        dim_cell(value)
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
