//! Test-run lifecycle: creation, execution through the evaluation engine,
//! reconciliation of engine items, cancellation, previews and summaries.

use super::{strip_model_decoration, CaseJob, EngineItem, EvalEngine, JobPrompt, MatrixJob};
use crate::assertions;
use crate::errors::{EngineError, RunError};
use crate::fingerprint;
use crate::mapping::{self, MappingValidation};
use crate::model::{
    new_id, now_rfc3339, ColumnMapping, MappingSource, PromptVersion, Row, RunProgress, RunStatus,
    TestResult, TestRun,
};
use crate::progress::{ProgressObserver, ProgressUpdate};
use crate::storage::{BeginOutcome, RecordStore};
use crate::summary::{self, EvaluationSummary};
use crate::template;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PREVIEW_SAMPLES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub name: Option<String>,
    pub prompt_ids: Vec<String>,
    pub dataset_id: String,
    pub model_ids: Vec<String>,
    pub column_mapping: Option<ColumnMapping>,
}

#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub prompt_id: String,
    pub dataset_id: String,
    pub column_mapping: Option<ColumnMapping>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewSample {
    pub case_id: String,
    pub raw_input: Row,
    pub mapped_input: Row,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub prompt_id: String,
    pub prompt_version: String,
    pub mapping: ColumnMapping,
    pub mapping_source: MappingSource,
    pub validation: MappingValidation,
    pub samples: Vec<PreviewSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingSuggestion {
    pub mapping: ColumnMapping,
    pub validation: MappingValidation,
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total_results: u64,
    pub passed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A pending run moved straight to `cancelled`.
    Cancelled,
    /// A running run was signalled; it ends `cancelled` once the engine call unwinds.
    Signalled,
}

struct LoadedPrompt {
    prompt_id: String,
    version: PromptVersion,
    label: String,
    required: Vec<String>,
}

/// Internal identity of one engine item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Triple {
    prompt_idx: usize,
    model_id: String,
    case_idx: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    engine: Arc<dyn EvalEngine>,
    observer: Arc<dyn ProgressObserver>,
    inflight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: Arc<dyn EvalEngine>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            store,
            engine,
            observer,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate a request and persist a `pending` run. Nothing is written on failure.
    pub fn create_run(&self, req: RunRequest) -> Result<TestRun, RunError> {
        let prompt_ids = dedup(&req.prompt_ids);
        let model_ids = dedup(&req.model_ids);
        if prompt_ids.is_empty() {
            return Err(RunError::NoPrompts);
        }
        if model_ids.is_empty() {
            return Err(RunError::NoModels);
        }

        let dataset = self
            .store
            .get_dataset(&req.dataset_id)?
            .ok_or_else(|| RunError::DatasetNotFound(req.dataset_id.clone()))?;
        let case_count = self.store.count_cases(&dataset.id)?;
        if case_count == 0 {
            return Err(RunError::EmptyDataset(dataset.id));
        }

        let prompts = self.load_prompts(&prompt_ids)?;
        let columns = self.first_columns(&dataset.id)?;
        let (resolved, source) = mapping::resolve_with_source(
            req.column_mapping.as_ref(),
            dataset.column_mapping.as_ref(),
            &columns,
        );
        check_coverage(&resolved, &prompts, &columns)?;

        let total_cases = case_count * prompt_ids.len() as u64 * model_ids.len() as u64;
        let run = TestRun {
            id: new_id("run"),
            name: req.name,
            prompt_ids,
            dataset_id: dataset.id,
            model_ids,
            resolved_mapping: resolved,
            mapping_source: source,
            status: RunStatus::Pending,
            progress: 0,
            total_cases,
            completed_cases: 0,
            created_at: now_rfc3339(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };
        self.store.insert_run(&run)?;

        tracing::info!(
            event = "promptgrid.run.created",
            run_id = %run.id,
            dataset_id = %run.dataset_id,
            prompts = run.prompt_ids.len(),
            models = run.model_ids.len(),
            total_cases = run.total_cases,
            mapping_source = run.mapping_source.as_str(),
        );
        Ok(run)
    }

    /// Execute a run and wait for it. Run-level failures are returned after the
    /// run has been marked `failed`.
    pub async fn execute(&self, run_id: &str, timeout: Duration) -> Result<RunSummary, RunError> {
        let (run, token) = self.begin(run_id)?;
        self.drive(run, token, timeout).await
    }

    /// Start a run on a detached task. The state transition happens before this
    /// returns, so a rejected request is reported here rather than by the task.
    pub fn spawn(
        &self,
        run_id: &str,
        timeout: Duration,
    ) -> Result<JoinHandle<Result<RunSummary, RunError>>, RunError> {
        let (run, token) = self.begin(run_id)?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.drive(run, token, timeout).await }))
    }

    pub fn cancel(&self, run_id: &str) -> Result<CancelOutcome, RunError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;

        match run.status {
            RunStatus::Pending => {
                if self.store.try_cancel_pending(run_id, &now_rfc3339())? {
                    tracing::info!(event = "promptgrid.run.cancelled", run_id = %run_id, was = "pending");
                    self.notify(&run, RunStatus::Cancelled, run.completed_cases);
                    return Ok(CancelOutcome::Cancelled);
                }
                // Lost a race with a concurrent transition.
                let status = self
                    .store
                    .get_run(run_id)?
                    .map(|r| r.status)
                    .unwrap_or(RunStatus::Cancelled);
                if status == RunStatus::Running && self.signal(run_id) {
                    return Ok(CancelOutcome::Signalled);
                }
                Err(RunError::InvalidTransition {
                    run_id: run_id.to_string(),
                    status,
                })
            }
            RunStatus::Running if self.signal(run_id) => Ok(CancelOutcome::Signalled),
            status => Err(RunError::InvalidTransition {
                run_id: run_id.to_string(),
                status,
            }),
        }
    }

    /// Dry-run one prompt against the first cases of a dataset. Render failures
    /// are reported per sample.
    pub fn preview(&self, req: PreviewRequest) -> Result<PreviewReport, RunError> {
        let prompt = self
            .load_prompts(std::slice::from_ref(&req.prompt_id))?
            .remove(0);
        let dataset = self
            .store
            .get_dataset(&req.dataset_id)?
            .ok_or_else(|| RunError::DatasetNotFound(req.dataset_id.clone()))?;
        let cases = self.store.first_cases(&dataset.id, req.sample_count.max(1))?;
        let Some(first) = cases.first() else {
            return Err(RunError::EmptyDataset(dataset.id));
        };
        let columns = first.columns();

        let (resolved, source) = mapping::resolve_with_source(
            req.column_mapping.as_ref(),
            dataset.column_mapping.as_ref(),
            &columns,
        );
        let validation = mapping::validate(&resolved, &prompt.required, &columns);

        let samples = cases
            .iter()
            .map(|case| {
                let mapped = mapping::apply(&case.raw_input, &resolved);
                let (rendered_prompt, error) =
                    match template::render(&prompt.version.content, &mapped, true) {
                        Ok(text) => (Some(text), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                PreviewSample {
                    case_id: case.id.clone(),
                    raw_input: case.raw_input.clone(),
                    mapped_input: mapped,
                    rendered_prompt,
                    error,
                }
            })
            .collect();

        Ok(PreviewReport {
            prompt_id: prompt.prompt_id,
            prompt_version: prompt.version.version(),
            mapping: resolved,
            mapping_source: source,
            validation,
            samples,
        })
    }

    pub fn suggest_mapping(
        &self,
        prompt_id: &str,
        dataset_id: &str,
    ) -> Result<MappingSuggestion, RunError> {
        let prompt = self
            .load_prompts(&[prompt_id.to_string()])?
            .remove(0);
        if self.store.get_dataset(dataset_id)?.is_none() {
            return Err(RunError::DatasetNotFound(dataset_id.to_string()));
        }
        let columns = self.first_columns(dataset_id)?;
        if columns.is_empty() && self.store.count_cases(dataset_id)? == 0 {
            return Err(RunError::EmptyDataset(dataset_id.to_string()));
        }
        let suggested = mapping::suggest(&columns, &prompt.required);
        let validation = mapping::validate(&suggested, &prompt.required, &columns);
        Ok(MappingSuggestion {
            mapping: suggested,
            validation,
        })
    }

    pub fn summary(&self, run_id: &str) -> Result<EvaluationSummary, RunError> {
        if self.store.get_run(run_id)?.is_none() {
            return Err(RunError::RunNotFound(run_id.to_string()));
        }
        let results = self.store.list_results(run_id)?;
        Ok(summary::summarize(run_id, &results))
    }

    // --- execution ---

    fn begin(&self, run_id: &str) -> Result<(TestRun, CancellationToken), RunError> {
        let run = match self.store.try_begin_run(run_id, &now_rfc3339())? {
            BeginOutcome::Started(run) => *run,
            BeginOutcome::NotFound => return Err(RunError::RunNotFound(run_id.to_string())),
            BeginOutcome::Rejected(status) => {
                return Err(RunError::InvalidTransition {
                    run_id: run_id.to_string(),
                    status,
                })
            }
        };
        let token = CancellationToken::new();
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run.id.clone(), token.clone());

        tracing::info!(
            event = "promptgrid.run.started",
            run_id = %run.id,
            total_cases = run.total_cases,
        );
        self.notify(&run, RunStatus::Running, 0);
        Ok((run, token))
    }

    fn signal(&self, run_id: &str) -> bool {
        let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        match inflight.get(run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(event = "promptgrid.run.cancel_requested", run_id = %run_id);
                true
            }
            None => false,
        }
    }

    async fn drive(
        &self,
        run: TestRun,
        token: CancellationToken,
        timeout: Duration,
    ) -> Result<RunSummary, RunError> {
        let outcome = self.run_matrix(&run, &token, timeout).await;
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run.id);

        let at = now_rfc3339();
        let (status, message) = match &outcome {
            Ok(_) => (RunStatus::Completed, None),
            Err(RunError::Cancelled) => (RunStatus::Cancelled, Some("cancelled by request".to_string())),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        let finished = self
            .store
            .finish_run(&run.id, status, message.as_deref(), &at)?;
        if !finished {
            tracing::warn!(
                event = "promptgrid.run.finish_skipped",
                run_id = %run.id,
                status = %status,
                "run was no longer running",
            );
        }

        let completed = self
            .store
            .get_run(&run.id)?
            .map(|r| r.completed_cases)
            .unwrap_or(0);
        self.notify(&run, status, completed);

        match &outcome {
            Ok(s) => tracing::info!(
                event = "promptgrid.run.completed",
                run_id = %run.id,
                results = s.total_results,
                passed = s.passed,
                failed = s.failed,
            ),
            Err(RunError::Cancelled) => tracing::warn!(
                event = "promptgrid.run.cancelled",
                run_id = %run.id,
                completed_cases = completed,
            ),
            Err(e) => tracing::warn!(
                event = "promptgrid.run.failed",
                run_id = %run.id,
                class = ?e.class(),
                error = %e,
                completed_cases = completed,
            ),
        }
        outcome
    }

    async fn run_matrix(
        &self,
        run: &TestRun,
        token: &CancellationToken,
        timeout: Duration,
    ) -> Result<RunSummary, RunError> {
        let prompts = self.load_prompts(&run.prompt_ids)?;
        let dataset = self
            .store
            .get_dataset(&run.dataset_id)?
            .ok_or_else(|| RunError::DatasetNotFound(run.dataset_id.clone()))?;
        let cases = self.store.list_cases(&dataset.id)?;
        let Some(first) = cases.first() else {
            return Err(RunError::EmptyDataset(dataset.id));
        };

        // The stored mapping is authoritative; it is only re-checked here.
        let mapping = &run.resolved_mapping;
        check_coverage(mapping, &prompts, &first.columns())?;

        let mut case_jobs = Vec::with_capacity(cases.len());
        for case in &cases {
            let vars = mapping::apply(&case.raw_input, mapping);
            for p in &prompts {
                template::render(&p.version.content, &vars, true).map_err(|source| {
                    RunError::Render {
                        prompt_id: p.prompt_id.clone(),
                        case_id: case.id.clone(),
                        source,
                    }
                })?;
            }
            let checks = assertions::merge(
                &dataset.default_assertions,
                case.assertions.as_deref().unwrap_or_default(),
                case.expected_output.as_deref(),
            );
            case_jobs.push(CaseJob {
                correlation_id: case.id.clone(),
                vars,
                assertions: checks,
            });
        }

        let job = MatrixJob {
            prompts: prompts
                .iter()
                .map(|p| JobPrompt {
                    label: p.label.clone(),
                    template: p.version.content.clone(),
                })
                .collect(),
            models: run.model_ids.clone(),
            cases: case_jobs,
        };

        // total_cases was fixed at creation; a dataset edited since then can
        // never reconcile, so stop before spending an engine call.
        let found = job.expected_items() as u64;
        if found != run.total_cases {
            return Err(RunError::DatasetChanged {
                dataset_id: run.dataset_id.clone(),
                expected: run.total_cases,
                found,
            });
        }

        let job_fingerprint = fingerprint::of_json(&job)?;
        tracing::info!(
            event = "promptgrid.engine.invoked",
            run_id = %run.id,
            engine = self.engine.name(),
            prompts = job.prompts.len(),
            models = job.models.len(),
            cases = job.cases.len(),
            fingerprint = %job_fingerprint,
            timeout_s = timeout.as_secs(),
        );
        let started = Instant::now();
        let items = tokio::select! {
            _ = token.cancelled() => return Err(RunError::Cancelled),
            res = tokio::time::timeout(timeout, self.engine.evaluate(&job)) => match res {
                Ok(items) => items?,
                Err(_) => return Err(EngineError::Timeout(timeout).into()),
            },
        };
        tracing::info!(
            event = "promptgrid.engine.finished",
            run_id = %run.id,
            items = items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );

        let triples = self.reconcile(run, &prompts, &job, &items)?;
        if (items.len() as u64) < run.total_cases {
            tracing::warn!(
                event = "promptgrid.engine.short_output",
                run_id = %run.id,
                expected = run.total_cases,
                received = items.len(),
            );
        }

        let mut passed = 0u64;
        let mut last = RunProgress::compute(0, run.total_cases);
        for (item, triple) in items.iter().zip(triples) {
            if token.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            let prompt = &prompts[triple.prompt_idx];
            let case_job = &job.cases[triple.case_idx];
            let rendered = if item.rendered_prompt.is_empty() {
                template::render(&prompt.version.content, &case_job.vars, false)
                    .unwrap_or_default()
            } else {
                item.rendered_prompt.clone()
            };

            let result = TestResult {
                id: new_id("res"),
                run_id: run.id.clone(),
                prompt_id: prompt.prompt_id.clone(),
                prompt_version: prompt.version.version(),
                model_id: triple.model_id,
                case_id: case_job.correlation_id.clone(),
                input_mapped: case_job.vars.clone(),
                input_rendered: rendered,
                output: item.output.clone(),
                latency_ms: item.latency_ms,
                input_tokens: item.input_tokens,
                output_tokens: item.output_tokens,
                assertion_results: item.checks.clone(),
                passed: item.success && item.checks.iter().all(|c| c.passed),
                error: item.error.clone(),
                created_at: now_rfc3339(),
            };
            let progress = self.store.insert_result(&result)?;
            debug_assert!(progress.completed_cases >= last.completed_cases);
            last = progress;
            if result.passed {
                passed += 1;
            }
            tracing::debug!(
                event = "promptgrid.result.persisted",
                run_id = %run.id,
                case_id = %result.case_id,
                model_id = %result.model_id,
                passed = result.passed,
                completed = progress.completed_cases,
            );
            self.observer.on_progress(&ProgressUpdate {
                run_id: run.id.clone(),
                completed_cases: progress.completed_cases,
                total_cases: progress.total_cases,
                progress: progress.progress,
                status: RunStatus::Running,
            });
        }

        let total = items.len() as u64;
        Ok(RunSummary {
            run_id: run.id.clone(),
            status: RunStatus::Completed,
            total_results: total,
            passed,
            failed: total - passed,
        })
    }

    /// Map every engine item back to internal ids before anything is persisted.
    fn reconcile(
        &self,
        run: &TestRun,
        prompts: &[LoadedPrompt],
        job: &MatrixJob,
        items: &[EngineItem],
    ) -> Result<Vec<Triple>, RunError> {
        if items.len() as u64 > run.total_cases {
            return Err(malformed(format!(
                "engine returned {} items for {} expected",
                items.len(),
                run.total_cases
            )));
        }

        let by_label: HashMap<&str, usize> = prompts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.label.as_str(), i))
            .collect();
        let by_case: HashMap<&str, usize> = job
            .cases
            .iter()
            .enumerate()
            .map(|(i, c)| (c.correlation_id.as_str(), i))
            .collect();

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let prompt_idx = *by_label
                .get(item.prompt_label.as_str())
                .ok_or_else(|| malformed(format!("unknown prompt label '{}'", item.prompt_label)))?;

            let model_id =
                strip_model_decoration(&item.provider_id, self.engine.model_prefix(), &run.model_ids);
            if !run.model_ids.contains(&model_id) {
                return Err(malformed(format!("unknown provider '{}'", item.provider_id)));
            }

            let case_idx = match (&item.correlation_id, item.test_index) {
                (Some(id), _) => by_case.get(id.as_str()).copied(),
                (None, Some(idx)) if idx < job.cases.len() => Some(idx),
                _ => None,
            }
            .ok_or_else(|| {
                malformed(format!(
                    "cannot correlate item (case {:?}, index {:?})",
                    item.correlation_id, item.test_index
                ))
            })?;

            let triple = Triple {
                prompt_idx,
                model_id,
                case_idx,
            };
            if !seen.insert(triple.clone()) {
                return Err(malformed(format!(
                    "duplicate item for prompt '{}', model '{}', case '{}'",
                    prompts[prompt_idx].prompt_id, triple.model_id, job.cases[case_idx].correlation_id
                )));
            }
            out.push(triple);
        }
        Ok(out)
    }

    // --- helpers ---

    fn load_prompts(&self, prompt_ids: &[String]) -> Result<Vec<LoadedPrompt>, RunError> {
        let mut out = Vec::with_capacity(prompt_ids.len());
        for id in prompt_ids {
            let prompt = self
                .store
                .get_prompt(id)?
                .ok_or_else(|| RunError::PromptNotFound(id.clone()))?;
            let version = prompt
                .active_version
                .ok_or_else(|| RunError::NoActiveVersion(id.clone()))?;
            let mut required = version.variables.clone();
            for v in template::extract(&version.content) {
                if !required.contains(&v) {
                    required.push(v);
                }
            }
            out.push(LoadedPrompt {
                label: format!("{}_v{}", id, version.version()),
                prompt_id: id.clone(),
                version,
                required,
            });
        }
        Ok(out)
    }

    fn first_columns(&self, dataset_id: &str) -> Result<Vec<String>, RunError> {
        Ok(self
            .store
            .first_cases(dataset_id, 1)?
            .first()
            .map(|c| c.columns())
            .unwrap_or_default())
    }

    fn notify(&self, run: &TestRun, status: RunStatus, completed: u64) {
        let p = RunProgress::compute(completed, run.total_cases);
        self.observer.on_progress(&ProgressUpdate {
            run_id: run.id.clone(),
            completed_cases: p.completed_cases,
            total_cases: p.total_cases,
            progress: p.progress,
            status,
        });
    }
}

fn check_coverage(
    resolved: &ColumnMapping,
    prompts: &[LoadedPrompt],
    columns: &[String],
) -> Result<(), RunError> {
    for p in prompts {
        let v = mapping::validate(resolved, &p.required, columns);
        for w in &v.warnings {
            tracing::warn!(event = "promptgrid.mapping.warning", prompt_id = %p.prompt_id, "{}", w);
        }
        if !v.is_valid {
            return Err(RunError::IncompleteMapping {
                prompt_id: p.prompt_id.clone(),
                missing: v.missing_variables,
                available: columns.to_vec(),
            });
        }
    }
    Ok(())
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen: IndexMap<&str, ()> = IndexMap::new();
    for id in ids {
        let id = id.trim();
        if !id.is_empty() {
            seen.insert(id, ());
        }
    }
    seen.keys().map(|s| s.to_string()).collect()
}

fn malformed(msg: String) -> RunError {
    RunError::Engine(EngineError::MalformedOutput(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let ids = vec!["b".to_string(), "a".into(), "b".into(), " ".into()];
        assert_eq!(dedup(&ids), vec!["b".to_string(), "a".to_string()]);
    }
}
