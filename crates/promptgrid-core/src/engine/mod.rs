//! External evaluation engine boundary.
//!
//! A run hands the engine one [`MatrixJob`] (every prompt x model x case) and
//! gets back one [`EngineItem`] per triple. Items carry the engine's own
//! identifiers; the orchestrator maps them back to internal ids.

pub mod orchestrator;
pub mod promptfoo;

use crate::assertions::EngineCheck;
use crate::errors::EngineError;
use crate::model::{CheckOutcome, Row};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JobPrompt {
    /// Opaque label the engine echoes back; the orchestrator uses the prompt id.
    pub label: String,
    pub template: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseJob {
    /// Internal case id, carried beside the variables rather than inside them.
    pub correlation_id: String,
    pub vars: Row,
    pub assertions: Vec<EngineCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixJob {
    pub prompts: Vec<JobPrompt>,
    pub models: Vec<String>,
    pub cases: Vec<CaseJob>,
}

impl MatrixJob {
    pub fn expected_items(&self) -> usize {
        self.prompts.len() * self.models.len() * self.cases.len()
    }
}

/// One evaluated (prompt, model, case) triple as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineItem {
    pub prompt_label: String,
    /// Prompt text as the engine rendered it; may be empty.
    pub rendered_prompt: String,
    /// Provider id in the engine's (possibly decorated) form.
    pub provider_id: String,
    pub correlation_id: Option<String>,
    /// Position of the case in the job, when the engine reports one.
    pub test_index: Option<usize>,
    pub output: String,
    pub latency_ms: f64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub success: bool,
    pub checks: Vec<CheckOutcome>,
    pub error: Option<String>,
}

#[async_trait]
pub trait EvalEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prefix the engine puts in front of model ids it reports back.
    fn model_prefix(&self) -> &str {
        ""
    }

    async fn evaluate(&self, job: &MatrixJob) -> Result<Vec<EngineItem>, EngineError>;
}

/// Recover the internal model id from a provider id the engine may have decorated.
///
/// The configured prefix is stripped first; otherwise a reported id ending in
/// `:<model>` for one of the run's models resolves to that model. Anything
/// else is returned unchanged.
pub fn strip_model_decoration(reported: &str, prefix: &str, models: &[String]) -> String {
    if models.iter().any(|m| m == reported) {
        return reported.to_string();
    }
    if !prefix.is_empty() {
        if let Some(rest) = reported.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    models
        .iter()
        .filter(|m| {
            reported.len() > m.len()
                && reported.ends_with(m.as_str())
                && reported.as_bytes()[reported.len() - m.len() - 1] == b':'
        })
        .max_by_key(|m| m.len())
        .cloned()
        .unwrap_or_else(|| reported.to_string())
}
