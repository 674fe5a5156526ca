//! Fused extracts through repair, loading and key mapping.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use cdm_core::{
    CheckpointFile, FailureKind, Orchestrator, Plan, RunState, STAGE_LOAD, Stage, StageContext,
    StageOutcome, StageStatus,
};
use cdm_ingest::{BulkLoader, LoadOptions, NoProgress, RepairOptions, repair_file};
use cdm_map::KeyMapper;
use cdm_model::{CancellationToken, EntityKind, PipelineConfig, StoreBackend};
use cdm_store::MemoryStore;
use tempfile::tempdir;

const ID: [&str; 3] = [
    "0b5b2fe1-0c7e-4c5d-9c1b-4a2f0e3c9d11",
    "5e3c1f0a-7b2d-4e8f-a1c3-9d0e2f4b6a81",
    "c2a4e6f8-1b3d-4f5a-8c7e-0d2f4a6b8c01",
];
const PATIENT: [&str; 2] = [
    "1d604da9-9a81-4ba9-80c2-de3375d59b40",
    "8f2e4c6a-0b1d-4e3f-a5c7-9e1b3d5f7a22",
];

const TABLE: &str = "stg_encounters";

struct RepairAndLoad;

impl Stage for RepairAndLoad {
    fn name(&self) -> &'static str {
        "load"
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let input = ctx.config.input_dir.join("encounters.csv");
        let output = ctx.config.processed_dir.join("encounters.csv");
        let repair = repair_file(&input, &output, &RepairOptions::default(), &NoProgress)?;
        let load = BulkLoader::new(ctx.store().as_ref(), LoadOptions::from_config(&ctx.config))
            .load_file(&output, TABLE)?;
        Ok(StageOutcome::rows(load.post_count).with_counter("rows_repaired", repair.repaired))
    }
}

struct MapPatients;

impl Stage for MapPatients {
    fn name(&self) -> &'static str {
        "map_keys"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["load"]
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let schema = ctx
            .store()
            .table_schema(TABLE)?
            .context("staged encounters missing")?;
        let column = schema.position("patient").context("no patient column")?;
        let patients: Vec<String> = ctx
            .store()
            .scan(TABLE)?
            .iter()
            .filter_map(|row| row[column].as_str().map(str::to_string))
            .collect();
        let mapper = KeyMapper::new(Arc::clone(ctx.store()));
        let keys = mapper.assign_many(EntityKind::Subject, &patients)?;
        Ok(StageOutcome::rows(keys.len() as u64))
    }
}

fn write_fused_extract(dir: &Path) {
    let rows: Vec<String> = [
        (ID[0], "2020-01-01T09:00:00Z", "2020-01-01T10:00:00Z", PATIENT[0]),
        (ID[1], "2020-02-01T09:00:00Z", "2020-02-01T09:30:00Z", PATIENT[1]),
        (ID[2], "2020-03-01T09:00:00Z", "2020-03-01T11:00:00Z", PATIENT[0]),
    ]
    .iter()
    .map(|(id, start, stop, patient)| format!("{id}{start}{stop}{patient}"))
    .collect();
    fs::write(
        dir.join("encounters.csv"),
        format!("id,start,stop,patient\n{}\n", rows.join("\n")),
    )
    .unwrap();
}

#[test]
fn fused_rows_are_repaired_loaded_and_keyed() {
    let dir = tempdir().unwrap();
    write_fused_extract(dir.path());
    let config = PipelineConfig::new(dir.path()).with_batch_size(2);
    let store = Arc::new(MemoryStore::new());
    let context = StageContext::new(config.clone(), store.clone());
    let plan = Plan::new().then(RepairAndLoad).then(MapPatients);

    let report = Orchestrator::new(plan, context).run().unwrap();
    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(report.stage("load").unwrap().rows, Some(3));
    assert_eq!(
        report.stage("load").unwrap().counters["rows_repaired"],
        3
    );

    let repaired = fs::read_to_string(dir.path().join("processed").join("encounters.csv")).unwrap();
    assert!(repaired.starts_with(&format!(
        "id,start,stop,patient\n{},2020-01-01T09:00:00Z,2020-01-01T10:00:00Z,{}\n",
        ID[0], PATIENT[0]
    )));

    let mapper = KeyMapper::new(store);
    assert_eq!(mapper.audit(EntityKind::Subject).unwrap().mappings, 2);
    assert_eq!(mapper.lookup(EntityKind::Subject, PATIENT[0]).unwrap(), Some(1));
    assert_eq!(mapper.lookup(EntityKind::Subject, PATIENT[1]).unwrap(), Some(2));

    let state = CheckpointFile::new(&config.checkpoint_path)
        .load()
        .unwrap()
        .unwrap();
    let expected: BTreeSet<String> = ["load", "map_keys"].map(String::from).into();
    assert_eq!(state.completed_steps, expected);
    assert_eq!(state.stats["load"].rows, 3);
    assert_eq!(state.stats["map_keys"].rows, 3);
}

fn write_synthea_extracts(dir: &Path) {
    fs::write(
        dir.join("patients.csv"),
        format!(
            "Id,BIRTHDATE,DEATHDATE,RACE,ETHNICITY,GENDER\n\
             {},1970-05-05,,white,nonhispanic,M\n\
             {},1985-11-30,,asian,hispanic,F\n",
            PATIENT[0], PATIENT[1]
        ),
    )
    .unwrap();
    fs::write(
        dir.join("encounters.csv"),
        format!(
            "Id,START,STOP,PATIENT,ORGANIZATION,PROVIDER,ENCOUNTERCLASS,CODE,DESCRIPTION\n\
             {},2020-01-01T09:00:00Z,2020-01-01T10:00:00Z,{},,,ambulatory,185345009,Encounter for symptom\n\
             {},2020-06-01T09:00:00Z,2020-06-03T10:00:00Z,{},,,inpatient,32485007,Hospital admission\n",
            ID[0], PATIENT[0], ID[1], PATIENT[1]
        ),
    )
    .unwrap();
    fs::write(
        dir.join("observations.csv"),
        format!(
            "DATE,PATIENT,ENCOUNTER,CODE,DESCRIPTION,VALUE,UNITS,TYPE\n\
             2020-01-01T09:10:00Z,{},{},8302-2,Body Height,180.5,cm,numeric\n\
             2020-01-01T09:12:00Z,{},{},72166-2,Tobacco smoking status,Never smoker,,text\n",
            PATIENT[0], ID[0], PATIENT[0], ID[0]
        ),
    )
    .unwrap();
}

#[test]
fn standard_plan_runs_once_and_resumes_as_a_no_op() {
    let dir = tempdir().unwrap();
    write_synthea_extracts(dir.path());
    let config = PipelineConfig::new(dir.path())
        .with_store(StoreBackend::Sqlite(dir.path().join("cdm.sqlite")))
        .with_workers(2);

    let orchestrator = Orchestrator::from_config(
        config.clone(),
        Arc::new(NoProgress),
        CancellationToken::new(),
    )
    .unwrap();
    let report = orchestrator.run().unwrap();
    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(report.stage("person").unwrap().rows, Some(2));
    assert_eq!(report.stage("visit_occurrence").unwrap().rows, Some(2));
    assert_eq!(report.stage("observations").unwrap().rows, Some(2));
    assert_eq!(report.stage("observation_period").unwrap().rows, Some(2));
    assert!(
        dir.path()
            .join("processed")
            .join("validation_report.json")
            .is_file()
    );

    let again = Orchestrator::from_config(config, Arc::new(NoProgress), CancellationToken::new())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(again.state, RunState::Completed);
    assert!(
        again
            .stages
            .iter()
            .all(|stage| stage.status == StageStatus::Skipped)
    );
}

fn run_standard(config: &PipelineConfig) -> cdm_core::RunReport {
    Orchestrator::from_config(config.clone(), Arc::new(NoProgress), CancellationToken::new())
        .unwrap()
        .run()
        .unwrap()
}

/// Rewinds the checkpoint to just after the repair stage, as if the run had
/// died while loading.
fn rewind_to_repair(config: &PipelineConfig) {
    let file = CheckpointFile::new(&config.checkpoint_path);
    let mut state = file.load().unwrap().unwrap();
    state.completed_steps.retain(|stage| stage == "repair");
    state.stats.retain(|stage, _| stage == "repair");
    file.save(&state).unwrap();
}

#[test]
fn interrupted_load_reruns_over_its_own_staged_rows() {
    let dir = tempdir().unwrap();
    write_synthea_extracts(dir.path());
    let config = PipelineConfig::new(dir.path())
        .with_store(StoreBackend::Sqlite(dir.path().join("cdm.sqlite")));
    assert!(run_standard(&config).is_success());

    rewind_to_repair(&config);
    let resumed = run_standard(&config);
    assert!(resumed.is_success(), "{:?}", resumed.failure);
    assert_eq!(resumed.stage("repair").unwrap().status, StageStatus::Skipped);
    assert_eq!(
        resumed.stage(STAGE_LOAD).unwrap().status,
        StageStatus::Completed
    );
    assert_eq!(
        resumed.stage(STAGE_LOAD).unwrap().counters["skipped_tables"],
        0
    );
    assert_eq!(resumed.stage("person").unwrap().rows, Some(2));

    let restarted = run_standard(&config.clone().with_force_restart(true));
    assert!(restarted.is_success(), "{:?}", restarted.failure);
    assert_eq!(restarted.stage("person").unwrap().rows, Some(2));
}

#[test]
fn staged_rows_from_another_input_still_abort() {
    let dir = tempdir().unwrap();
    let (first, second) = (dir.path().join("first"), dir.path().join("second"));
    for input in [&first, &second] {
        fs::create_dir_all(input).unwrap();
        write_synthea_extracts(input);
    }
    let store = StoreBackend::Sqlite(dir.path().join("shared.sqlite"));
    let config = PipelineConfig::new(&first).with_store(store.clone());
    assert!(run_standard(&config).is_success());

    let other = PipelineConfig::new(&second).with_store(store);
    let report = run_standard(&other);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, STAGE_LOAD);
    assert!(failure.reason.contains("already holds"), "{}", failure.reason);
}

#[test]
fn missing_repaired_file_is_a_precondition_failure() {
    let dir = tempdir().unwrap();
    write_synthea_extracts(dir.path());
    let config = PipelineConfig::new(dir.path())
        .with_store(StoreBackend::Sqlite(dir.path().join("cdm.sqlite")));
    assert!(run_standard(&config).is_success());

    rewind_to_repair(&config);
    fs::remove_file(config.processed_dir.join("patients.csv")).unwrap();
    let report = run_standard(&config);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, STAGE_LOAD);
    assert_eq!(failure.kind, FailureKind::Precondition);
}

#[test]
fn missing_input_directory_is_a_precondition_failure() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig::new(dir.path().join("absent"));
    let err = Orchestrator::from_config(config, Arc::new(NoProgress), CancellationToken::new())
        .err()
        .unwrap();
    assert!(matches!(err, cdm_core::PipelineError::Precondition(_)));
}
