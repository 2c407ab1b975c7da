use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw-column name -> template-variable name, in declaration order.
pub type ColumnMapping = IndexMap<String, String>;

/// One raw row (or one set of bound variables), in column order.
pub type Row = IndexMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssertionType {
    Contains,
    NotContains,
    IsJson,
    Regex,
    Equals,
    StartsWith,
    LlmRubric,
}

impl AssertionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionType::Contains => "contains",
            AssertionType::NotContains => "not-contains",
            AssertionType::IsJson => "is-json",
            AssertionType::Regex => "regex",
            AssertionType::Equals => "equals",
            AssertionType::StartsWith => "starts-with",
            AssertionType::LlmRubric => "llm-rubric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contains" => Some(AssertionType::Contains),
            "not-contains" => Some(AssertionType::NotContains),
            "is-json" => Some(AssertionType::IsJson),
            "regex" => Some(AssertionType::Regex),
            "equals" => Some(AssertionType::Equals),
            "starts-with" => Some(AssertionType::StartsWith),
            "llm-rubric" => Some(AssertionType::LlmRubric),
            _ => None,
        }
    }

    /// Whether the engine schema carries a `value` for this check.
    pub fn takes_value(&self) -> bool {
        !matches!(self, AssertionType::IsJson)
    }
}

impl std::fmt::Display for AssertionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared check, as stored on a dataset or a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Assertion {
    pub fn new(kind: AssertionType) -> Self {
        Self {
            kind,
            value: None,
            threshold: None,
            description: None,
        }
    }

    pub fn with_value(kind: AssertionType, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(kind)
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_version: Option<PromptVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub prompt_id: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub content: String,
    /// Variables extracted from `content` when the version was stored.
    #[serde(default)]
    pub variables: Vec<String>,
}

impl PromptVersion {
    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_mapping: Option<ColumnMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_assertions: Vec<Assertion>,
}

/// Immutable raw input row. Mapping produces a derived view; this is never rewritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub dataset_id: String,
    pub raw_input: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<Assertion>>,
    #[serde(default)]
    pub is_edge_case: bool,
    #[serde(default)]
    pub is_error_pattern: bool,
}

impl TestCase {
    pub fn columns(&self) -> Vec<String> {
        self.raw_input.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// States from which an execution request is accepted.
    pub const EXECUTABLE: [RunStatus; 2] = [RunStatus::Pending, RunStatus::Failed];
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which precedence tier produced a run's mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    RunOverride,
    DatasetDefault,
    Identity,
}

impl MappingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingSource::RunOverride => "run_override",
            MappingSource::DatasetDefault => "dataset_default",
            MappingSource::Identity => "identity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run_override" => Some(MappingSource::RunOverride),
            "dataset_default" => Some(MappingSource::DatasetDefault),
            "identity" => Some(MappingSource::Identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub prompt_ids: Vec<String>,
    pub dataset_id: String,
    pub model_ids: Vec<String>,
    /// Fixed at creation; never recomputed from the dataset afterwards.
    pub resolved_mapping: ColumnMapping,
    pub mapping_source: MappingSource,
    pub status: RunStatus,
    pub progress: u32,
    pub total_cases: u64,
    pub completed_cases: u64,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Per-check outcome as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One row per (prompt, prompt-version, model, case) triple of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub run_id: String,
    pub prompt_id: String,
    pub prompt_version: String,
    pub model_id: String,
    pub case_id: String,
    pub input_mapped: Row,
    pub input_rendered: String,
    pub output: String,
    pub latency_ms: f64,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub assertion_results: Vec<CheckOutcome>,
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: String,
}

/// Counters of a run after one more result was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed_cases: u64,
    pub total_cases: u64,
    pub progress: u32,
}

impl RunProgress {
    pub fn compute(completed_cases: u64, total_cases: u64) -> Self {
        let progress = if total_cases == 0 {
            0
        } else {
            (completed_cases.min(total_cases) * 100 / total_cases) as u32
        };
        Self {
            completed_cases,
            total_cases,
            progress,
        }
    }
}

pub fn new_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &raw[..12])
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
