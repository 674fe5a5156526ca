//! Rendering of run reports and checkpoint status.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use cdm_cli::summary::{format_counters, run_table, status_table};
use cdm_core::{
    CheckpointState, FailureKind, RunFailure, RunReport, RunState, StageReport, StageStats,
    StageStatus,
};
use cdm_model::PipelineConfig;

fn stage(name: &str, status: StageStatus, rows: Option<u64>) -> StageReport {
    StageReport {
        name: name.to_string(),
        status,
        duration_seconds: 0.25,
        rows,
        counters: BTreeMap::from([("rows_skipped".to_string(), 2), ("short_loads".to_string(), 0)]),
    }
}

#[test]
fn counters_skip_zero_values() {
    let counters = BTreeMap::from([
        ("unmapped".to_string(), 12),
        ("orphan_rows".to_string(), 0),
        ("invalid_dates".to_string(), 3),
    ]);
    insta::assert_snapshot!(format_counters(&counters), @"invalid_dates=3, unmapped=12");
    assert_eq!(format_counters(&BTreeMap::new()), "-");
}

#[test]
fn run_table_lists_every_stage() {
    let report = RunReport {
        pipeline_id: "0123456789abcdef".to_string(),
        state: RunState::Failed,
        checkpoint: PathBuf::from("processed/checkpoint.json"),
        stages: vec![
            stage("repair", StageStatus::Skipped, Some(40)),
            stage("stage_load", StageStatus::Completed, Some(40)),
            stage("key_bootstrap", StageStatus::Failed, None),
            stage("person", StageStatus::NotRun, None),
        ],
        failure: Some(RunFailure {
            stage: "key_bootstrap".to_string(),
            kind: FailureKind::MappingConflict,
            reason: "conflict".to_string(),
        }),
        duration_seconds: 1.5,
    };
    let mut table = run_table(&report);
    table.force_no_tty();
    let rendered = table.to_string();
    for name in ["repair", "stage_load", "key_bootstrap", "person", "TOTAL"] {
        assert!(rendered.contains(name), "{name} missing from\n{rendered}");
    }
    assert!(rendered.contains("not run"));
    assert!(rendered.contains("rows_skipped=2"));
    assert!(!rendered.contains("short_loads"));
}

#[test]
fn status_table_follows_plan_order() {
    let mut state = CheckpointState::new("0123456789abcdef");
    state.config = Some(PipelineConfig::new("/data/synthea"));
    state.mark_completed(
        "repair",
        StageStats {
            duration_seconds: 2.0,
            rows: 120,
            counters: BTreeMap::new(),
            completed_at: Utc::now(),
        },
    );
    state.mark_failed("stage_load", FailureKind::Store, "database is locked");

    let mut table = status_table(&state);
    table.force_no_tty();
    let rendered = table.to_string();
    let position = |needle: &str| rendered.find(needle).unwrap();
    assert!(position("repair") < position("stage_load"));
    assert!(position("stage_load") < position("validate"));
    assert!(rendered.contains("completed"));
    assert!(rendered.contains("store: database is locked"));
    assert!(rendered.contains("pending"));
}
