use promptgrid_core::model::{
    new_id, now_rfc3339, ColumnMapping, Dataset, MappingSource, PromptVersion, Row, RunStatus,
    TestCase, TestResult, TestRun,
};
use promptgrid_core::storage::{BeginOutcome, RecordStore, SqliteStore};
use serde_json::json;
use tempfile::tempdir;

fn seed(store: &SqliteStore) -> anyhow::Result<()> {
    store.put_prompt("p1", "greeting")?;
    store.put_prompt_version(
        &PromptVersion {
            id: "pv1".into(),
            prompt_id: "p1".into(),
            major: 1,
            minor: 0,
            patch: 0,
            content: "Hi {{name}}".into(),
            variables: vec!["name".into()],
        },
        true,
    )?;
    store.put_dataset(&Dataset {
        id: "d1".into(),
        name: "people".into(),
        ..Default::default()
    })?;
    for (id, name) in [("c1", "Ann"), ("c2", "Bo")] {
        let mut raw = Row::new();
        raw.insert("name".into(), json!(name));
        store.put_case(&TestCase {
            id: id.into(),
            dataset_id: "d1".into(),
            raw_input: raw,
            ..Default::default()
        })?;
    }
    Ok(())
}

fn pending_run(total: u64) -> TestRun {
    let mut mapping = ColumnMapping::new();
    mapping.insert("name".into(), "name".into());
    TestRun {
        id: new_id("run"),
        name: None,
        prompt_ids: vec!["p1".into()],
        dataset_id: "d1".into(),
        model_ids: vec!["m1".into()],
        resolved_mapping: mapping,
        mapping_source: MappingSource::Identity,
        status: RunStatus::Pending,
        progress: 0,
        total_cases: total,
        completed_cases: 0,
        created_at: now_rfc3339(),
        started_at: None,
        completed_at: None,
        error_message: None,
    }
}

fn result(run_id: &str, case_id: &str) -> TestResult {
    TestResult {
        id: new_id("res"),
        run_id: run_id.into(),
        prompt_id: "p1".into(),
        prompt_version: "1.0.0".into(),
        model_id: "m1".into(),
        case_id: case_id.into(),
        input_mapped: Row::new(),
        input_rendered: "Hi".into(),
        output: "Hello".into(),
        latency_ms: 10.0,
        input_tokens: Some(3),
        output_tokens: None,
        assertion_results: vec![],
        passed: true,
        error: None,
        created_at: now_rfc3339(),
    }
}

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = SqliteStore::open(&dir.path().join("grid.db"))?;
    store.init_schema()?;
    // idempotent
    store.init_schema()?;
    seed(&store)?;

    let prompt = store.get_prompt("p1")?.expect("prompt");
    assert_eq!(prompt.active_version.expect("active").variables, vec!["name"]);
    assert_eq!(store.count_cases("d1")?, 2);
    assert_eq!(store.first_cases("d1", 1)?[0].id, "c1");

    let run = pending_run(2);
    store.insert_run(&run)?;

    let started = match store.try_begin_run(&run.id, &now_rfc3339())? {
        BeginOutcome::Started(r) => r,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(started.status, RunStatus::Running);
    assert!(matches!(
        store.try_begin_run(&run.id, &now_rfc3339())?,
        BeginOutcome::Rejected(RunStatus::Running)
    ));

    let p1 = store.insert_result(&result(&run.id, "c1"))?;
    assert_eq!((p1.completed_cases, p1.progress), (1, 50));
    let p2 = store.insert_result(&result(&run.id, "c2"))?;
    assert_eq!((p2.completed_cases, p2.progress), (2, 100));
    assert!(store.insert_result(&result(&run.id, "c1")).is_err());

    assert!(store.finish_run(&run.id, RunStatus::Completed, None, &now_rfc3339())?);
    assert!(!store.finish_run(&run.id, RunStatus::Failed, Some("late"), &now_rfc3339())?);

    let done = store.get_run(&run.id)?.expect("run");
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.completed_cases, 2);
    assert!(done.completed_at.is_some());

    let results = store.list_results(&run.id)?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].case_id, "c1");
    assert_eq!(results[0].input_tokens, Some(3));
    Ok(())
}

#[test]
fn failed_run_restart_discards_partial_results() -> anyhow::Result<()> {
    let store = SqliteStore::memory()?;
    store.init_schema()?;
    seed(&store)?;

    let run = pending_run(2);
    store.insert_run(&run)?;
    assert!(matches!(
        store.try_begin_run(&run.id, &now_rfc3339())?,
        BeginOutcome::Started(_)
    ));
    store.insert_result(&result(&run.id, "c1"))?;
    store.finish_run(&run.id, RunStatus::Failed, Some("boom"), &now_rfc3339())?;

    let failed = store.get_run(&run.id)?.expect("run");
    assert_eq!(failed.error_message.as_deref(), Some("boom"));
    assert_eq!(store.list_results(&run.id)?.len(), 1);

    assert!(matches!(
        store.try_begin_run(&run.id, &now_rfc3339())?,
        BeginOutcome::Started(_)
    ));
    let restarted = store.get_run(&run.id)?.expect("run");
    assert_eq!(restarted.completed_cases, 0);
    assert_eq!(restarted.error_message, None);
    assert!(store.list_results(&run.id)?.is_empty());
    Ok(())
}

#[test]
fn cancel_and_list_by_status() -> anyhow::Result<()> {
    let store = SqliteStore::memory()?;
    store.init_schema()?;
    seed(&store)?;

    let a = pending_run(2);
    let b = pending_run(2);
    store.insert_run(&a)?;
    store.insert_run(&b)?;

    assert!(store.try_cancel_pending(&a.id, &now_rfc3339())?);
    assert!(!store.try_cancel_pending(&a.id, &now_rfc3339())?);
    assert!(matches!(
        store.try_begin_run(&a.id, &now_rfc3339())?,
        BeginOutcome::Rejected(RunStatus::Cancelled)
    ));
    assert!(matches!(
        store.try_begin_run("run_missing", &now_rfc3339())?,
        BeginOutcome::NotFound
    ));

    let cancelled = store.list_runs(Some(RunStatus::Cancelled), 10, 0)?;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, a.id);
    assert_eq!(store.list_runs(None, 10, 0)?.len(), 2);
    assert_eq!(store.list_runs(None, 1, 1)?.len(), 1);
    Ok(())
}
