//! Record-store boundary consumed by the orchestrator.
//!
//! The orchestrator only ever sees `Arc<dyn RecordStore>`; every write it
//! issues (run insert, status transition, result insert + counter bump) is a
//! single atomic operation on the implementation side.

pub mod schema;
pub mod store;

pub use store::SqliteStore;

use crate::model::{Dataset, Prompt, RunProgress, RunStatus, TestCase, TestResult, TestRun};

/// Outcome of the compare-and-swap `pending|failed -> running` transition.
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    Started(Box<TestRun>),
    NotFound,
    Rejected(RunStatus),
}

pub trait RecordStore: Send + Sync {
    fn get_prompt(&self, prompt_id: &str) -> anyhow::Result<Option<Prompt>>;

    fn get_dataset(&self, dataset_id: &str) -> anyhow::Result<Option<Dataset>>;

    /// All cases of a dataset in insertion order.
    fn list_cases(&self, dataset_id: &str) -> anyhow::Result<Vec<TestCase>>;

    fn first_cases(&self, dataset_id: &str, limit: usize) -> anyhow::Result<Vec<TestCase>>;

    fn count_cases(&self, dataset_id: &str) -> anyhow::Result<u64>;

    fn insert_run(&self, run: &TestRun) -> anyhow::Result<()>;

    fn get_run(&self, run_id: &str) -> anyhow::Result<Option<TestRun>>;

    fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<Vec<TestRun>>;

    /// Move a `pending` or `failed` run to `running`. Partial results of an
    /// earlier failed attempt are discarded and counters reset in the same
    /// transaction.
    fn try_begin_run(&self, run_id: &str, started_at: &str) -> anyhow::Result<BeginOutcome>;

    /// Set a terminal status on a `running` run. Returns false if the run was
    /// not running.
    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        at: &str,
    ) -> anyhow::Result<bool>;

    /// `pending -> cancelled`; false if the run was in any other state.
    fn try_cancel_pending(&self, run_id: &str, at: &str) -> anyhow::Result<bool>;

    /// Insert one result and bump the owning run's counters atomically.
    fn insert_result(&self, result: &TestResult) -> anyhow::Result<RunProgress>;

    fn list_results(&self, run_id: &str) -> anyhow::Result<Vec<TestResult>>;
}
