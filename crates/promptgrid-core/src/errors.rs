use crate::model::RunStatus;
use crate::template::TemplateError;
use std::time::Duration;

/// Failures of the external evaluation engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start evaluation engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluation engine failed (exit {code}): {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("evaluation engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes; decides how an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Raised before any engine call; the run is left `pending` or never created.
    Precondition,
    /// The engine invocation as a whole failed; the run ends `failed`.
    Engine,
    /// A strict render failed before the engine was invoked.
    Rendering,
    Store,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("test run not found: {0}")]
    RunNotFound(String),

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("no active version for prompt: {0}")]
    NoActiveVersion(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("dataset has no cases: {0}")]
    EmptyDataset(String),

    #[error("a run needs at least one prompt")]
    NoPrompts,

    #[error("a run needs at least one model")]
    NoModels,

    #[error(
        "prompt '{prompt_id}' requires variables {missing:?} but the mapping does not provide them (available columns: {available:?})"
    )]
    IncompleteMapping {
        prompt_id: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("test run {run_id} is already {status}")]
    InvalidTransition { run_id: String, status: RunStatus },

    #[error(
        "dataset '{dataset_id}' changed since the run was created: expected {expected} results, current cases give {found}"
    )]
    DatasetChanged {
        dataset_id: String,
        expected: u64,
        found: u64,
    },

    #[error("cannot render prompt '{prompt_id}' for case '{case_id}': {source}")]
    Render {
        prompt_id: String,
        case_id: String,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("test run was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RunError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RunError::RunNotFound(_)
            | RunError::PromptNotFound(_)
            | RunError::NoActiveVersion(_)
            | RunError::DatasetNotFound(_)
            | RunError::EmptyDataset(_)
            | RunError::NoPrompts
            | RunError::NoModels
            | RunError::IncompleteMapping { .. }
            | RunError::InvalidTransition { .. }
            | RunError::DatasetChanged { .. } => ErrorClass::Precondition,
            RunError::Render { .. } => ErrorClass::Rendering,
            RunError::Engine(_) => ErrorClass::Engine,
            RunError::Cancelled => ErrorClass::Cancelled,
            RunError::Store(_) => ErrorClass::Store,
        }
    }
}

/// Configuration and catalog loading failures.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(RunError::EmptyDataset("d".into()).class(), ErrorClass::Precondition);
        assert_eq!(
            RunError::Engine(EngineError::Timeout(Duration::from_secs(1))).class(),
            ErrorClass::Engine
        );
        assert_eq!(
            RunError::Render {
                prompt_id: "p".into(),
                case_id: "c".into(),
                source: TemplateError::MissingVariable { name: "x".into() },
            }
            .class(),
            ErrorClass::Rendering
        );
    }

    #[test]
    fn nonzero_exit_message_carries_stderr() {
        let e = EngineError::NonZeroExit {
            code: 3,
            stderr: "boom".into(),
        };
        assert_eq!(e.to_string(), "evaluation engine failed (exit 3): boom");
    }
}
