use super::{BeginOutcome, RecordStore};
use crate::model::{
    Dataset, MappingSource, Prompt, PromptVersion, RunProgress, RunStatus, TestCase, TestResult,
    TestRun,
};
use anyhow::Context;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed record store. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    pub conn: Arc<Mutex<Connection>>,
}

const RUN_COLUMNS: &str = "id, name, prompt_ids_json, dataset_id, model_ids_json, resolved_mapping_json,
     mapping_source, status, progress, total_cases, completed_cases, created_at, started_at,
     completed_at, error_message";

const CASE_COLUMNS: &str = "id, dataset_id, raw_input_json, expected_output, assertions_json,
     is_edge_case, is_error_pattern";

const RESULT_COLUMNS: &str = "id, run_id, prompt_id, prompt_version, model_id, case_id,
     input_mapped_json, input_rendered, output, latency_ms, input_tokens, output_tokens,
     assertion_results_json, passed, error, created_at";

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)
            .context("failed to apply schema")?;
        Ok(())
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection mutex poisoned"))
    }

    // --- seeding writers (catalog / tests) ---

    pub fn put_prompt(&self, id: &str, name: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prompts(id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name",
            params![id, name, crate::model::now_rfc3339()],
        )
        .context("insert prompt")?;
        Ok(())
    }

    /// Store a version; `active` demotes every other version of the prompt.
    pub fn put_prompt_version(&self, v: &PromptVersion, active: bool) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if active {
            tx.execute(
                "UPDATE prompt_versions SET is_active = 0 WHERE prompt_id = ?1",
                params![v.prompt_id],
            )?;
        }
        tx.execute(
            "INSERT INTO prompt_versions(id, prompt_id, major, minor, patch, content, variables_json, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                v.id,
                v.prompt_id,
                v.major,
                v.minor,
                v.patch,
                v.content,
                serde_json::to_string(&v.variables)?,
                active,
                crate::model::now_rfc3339()
            ],
        )
        .context("insert prompt version")?;
        tx.commit()?;
        Ok(())
    }

    pub fn put_dataset(&self, d: &Dataset) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let mapping = d
            .column_mapping
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO datasets(id, name, column_mapping_json, default_assertions_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name,
                column_mapping_json=excluded.column_mapping_json,
                default_assertions_json=excluded.default_assertions_json",
            params![
                d.id,
                d.name,
                mapping,
                serde_json::to_string(&d.default_assertions)?,
                crate::model::now_rfc3339()
            ],
        )
        .context("insert dataset")?;
        Ok(())
    }

    pub fn put_case(&self, c: &TestCase) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let assertions = c.assertions.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO test_cases(id, dataset_id, raw_input_json, expected_output, assertions_json, is_edge_case, is_error_pattern, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                c.id,
                c.dataset_id,
                serde_json::to_string(&c.raw_input)?,
                c.expected_output,
                assertions,
                c.is_edge_case,
                c.is_error_pattern,
                crate::model::now_rfc3339()
            ],
        )
        .context("insert test case")?;
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        if ![
            "prompts",
            "prompt_versions",
            "datasets",
            "test_cases",
            "test_runs",
            "test_results",
        ]
        .contains(&table)
        {
            anyhow::bail!("invalid table name for count_rows: {}", table);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

impl RecordStore for SqliteStore {
    fn get_prompt(&self, prompt_id: &str) -> anyhow::Result<Option<Prompt>> {
        let conn = self.lock()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM prompts WHERE id = ?1",
                params![prompt_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let active_version = conn
            .query_row(
                "SELECT id, prompt_id, major, minor, patch, content, variables_json
                 FROM prompt_versions WHERE prompt_id = ?1 AND is_active = 1
                 ORDER BY created_at DESC LIMIT 1",
                params![prompt_id],
                |r| {
                    Ok(PromptVersion {
                        id: r.get(0)?,
                        prompt_id: r.get(1)?,
                        major: r.get(2)?,
                        minor: r.get(3)?,
                        patch: r.get(4)?,
                        content: r.get(5)?,
                        variables: json_col(r, 6)?,
                    })
                },
            )
            .optional()?;

        Ok(Some(Prompt {
            id: prompt_id.to_string(),
            name,
            active_version,
        }))
    }

    fn get_dataset(&self, dataset_id: &str) -> anyhow::Result<Option<Dataset>> {
        let conn = self.lock()?;
        let ds = conn
            .query_row(
                "SELECT id, name, column_mapping_json, default_assertions_json FROM datasets WHERE id = ?1",
                params![dataset_id],
                |r| {
                    Ok(Dataset {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        column_mapping: opt_json_col(r, 2)?,
                        default_assertions: json_col(r, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(ds)
    }

    fn list_cases(&self, dataset_id: &str) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM test_cases WHERE dataset_id = ?1 ORDER BY seq ASC",
            CASE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![dataset_id], case_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn first_cases(&self, dataset_id: &str, limit: usize) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM test_cases WHERE dataset_id = ?1 ORDER BY seq ASC LIMIT ?2",
            CASE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![dataset_id, limit as i64], case_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_cases(&self, dataset_id: &str) -> anyhow::Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM test_cases WHERE dataset_id = ?1",
            params![dataset_id],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    fn insert_run(&self, run: &TestRun) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO test_runs(id, name, prompt_ids_json, dataset_id, model_ids_json, resolved_mapping_json,
                mapping_source, status, progress, total_cases, completed_cases, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.id,
                run.name,
                serde_json::to_string(&run.prompt_ids)?,
                run.dataset_id,
                serde_json::to_string(&run.model_ids)?,
                serde_json::to_string(&run.resolved_mapping)?,
                run.mapping_source.as_str(),
                run.status.as_str(),
                run.progress,
                run.total_cases as i64,
                run.completed_cases as i64,
                run.created_at,
            ],
        )
        .context("insert test run")?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> anyhow::Result<Option<TestRun>> {
        let conn = self.lock()?;
        fetch_run(&conn, run_id)
    }

    fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<Vec<TestRun>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM test_runs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit, offset],
                run_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn try_begin_run(&self, run_id: &str, started_at: &str) -> anyhow::Result<BeginOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM test_runs WHERE id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Ok(BeginOutcome::NotFound);
        };
        let status = RunStatus::parse(&status)
            .with_context(|| format!("unknown run status '{}' for run {}", status, run_id))?;
        if !RunStatus::EXECUTABLE.contains(&status) {
            return Ok(BeginOutcome::Rejected(status));
        }

        let changed = tx.execute(
            "UPDATE test_runs
             SET status = 'running', started_at = ?2, completed_at = NULL, error_message = NULL,
                 completed_cases = 0, progress = 0
             WHERE id = ?1 AND status = ?3",
            params![run_id, started_at, status.as_str()],
        )?;
        if changed != 1 {
            return Ok(BeginOutcome::Rejected(RunStatus::Running));
        }
        tx.execute("DELETE FROM test_results WHERE run_id = ?1", params![run_id])?;

        let run = fetch_run(&tx, run_id)?
            .with_context(|| format!("run {} vanished during transition", run_id))?;
        tx.commit()?;
        Ok(BeginOutcome::Started(Box::new(run)))
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        at: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE test_runs
             SET status = ?2, completed_at = ?3, error_message = COALESCE(?4, error_message)
             WHERE id = ?1 AND status = 'running'",
            params![run_id, status.as_str(), at, error_message],
        )?;
        Ok(changed == 1)
    }

    fn try_cancel_pending(&self, run_id: &str, at: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE test_runs SET status = 'cancelled', completed_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![run_id, at],
        )?;
        Ok(changed == 1)
    }

    fn insert_result(&self, r: &TestResult) -> anyhow::Result<RunProgress> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO test_results(id, run_id, prompt_id, prompt_version, model_id, case_id,
                input_mapped_json, input_rendered, output, latency_ms, input_tokens, output_tokens,
                assertion_results_json, passed, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                r.id,
                r.run_id,
                r.prompt_id,
                r.prompt_version,
                r.model_id,
                r.case_id,
                serde_json::to_string(&r.input_mapped)?,
                r.input_rendered,
                r.output,
                r.latency_ms,
                r.input_tokens.map(|v| v as i64),
                r.output_tokens.map(|v| v as i64),
                serde_json::to_string(&r.assertion_results)?,
                r.passed,
                r.error,
                r.created_at,
            ],
        )
        .context("insert test result")?;

        let (completed, total): (i64, i64) = tx.query_row(
            "SELECT completed_cases + 1, total_cases FROM test_runs WHERE id = ?1",
            params![r.run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if completed > total {
            anyhow::bail!(
                "run {} would exceed its {} expected results",
                r.run_id,
                total
            );
        }
        let p = RunProgress::compute(completed as u64, total as u64);
        tx.execute(
            "UPDATE test_runs SET completed_cases = ?2, progress = ?3 WHERE id = ?1",
            params![r.run_id, completed, p.progress],
        )?;
        tx.commit()?;
        Ok(p)
    }

    fn list_results(&self, run_id: &str) -> anyhow::Result<Vec<TestResult>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM test_results WHERE run_id = ?1 ORDER BY seq ASC",
            RESULT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![run_id], result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn fetch_run(conn: &Connection, run_id: &str) -> anyhow::Result<Option<TestRun>> {
    let sql = format!("SELECT {} FROM test_runs WHERE id = ?1", RUN_COLUMNS);
    let run = conn
        .query_row(&sql, params![run_id], run_from_row)
        .optional()?;
    Ok(run)
}

fn json_col<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_col<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        _ => Ok(None),
    }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn run_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TestRun> {
    let source: String = r.get(6)?;
    let status: String = r.get(7)?;
    Ok(TestRun {
        id: r.get(0)?,
        name: r.get(1)?,
        prompt_ids: json_col(r, 2)?,
        dataset_id: r.get(3)?,
        model_ids: json_col(r, 4)?,
        resolved_mapping: json_col(r, 5)?,
        mapping_source: MappingSource::parse(&source)
            .ok_or_else(|| conversion_error(6, format!("unknown mapping source '{}'", source)))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| conversion_error(7, format!("unknown run status '{}'", status)))?,
        progress: r.get(8)?,
        total_cases: r.get::<_, i64>(9)? as u64,
        completed_cases: r.get::<_, i64>(10)? as u64,
        created_at: r.get(11)?,
        started_at: r.get(12)?,
        completed_at: r.get(13)?,
        error_message: r.get(14)?,
    })
}

fn case_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TestCase> {
    Ok(TestCase {
        id: r.get(0)?,
        dataset_id: r.get(1)?,
        raw_input: json_col(r, 2)?,
        expected_output: r.get(3)?,
        assertions: opt_json_col(r, 4)?,
        is_edge_case: r.get(5)?,
        is_error_pattern: r.get(6)?,
    })
}

fn result_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TestResult> {
    Ok(TestResult {
        id: r.get(0)?,
        run_id: r.get(1)?,
        prompt_id: r.get(2)?,
        prompt_version: r.get(3)?,
        model_id: r.get(4)?,
        case_id: r.get(5)?,
        input_mapped: json_col(r, 6)?,
        input_rendered: r.get(7)?,
        output: r.get(8)?,
        latency_ms: r.get(9)?,
        input_tokens: r.get::<_, Option<i64>>(10)?.map(|v| v as u64),
        output_tokens: r.get::<_, Option<i64>>(11)?.map(|v| v as u64),
        assertion_results: json_col(r, 12)?,
        passed: r.get(13)?,
        error: r.get(14)?,
        created_at: r.get(15)?,
    })
}
