//! promptfoo as the external evaluation engine.
//!
//! One `promptfoo eval` subprocess per matrix job. The job is written as a
//! promptfoo config in a scratch directory, the JSON output file is read back
//! and flattened into [`EngineItem`]s.

use super::{EngineItem, EvalEngine, MatrixJob};
use crate::config::{EngineConfig, ProviderConfig};
use crate::errors::EngineError;
use crate::model::CheckOutcome;
use crate::template;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

pub const CONFIG_FILE: &str = "promptfooconfig.yaml";
pub const OUTPUT_FILE: &str = "output.json";

#[derive(Debug, Clone)]
pub struct PromptfooEngine {
    argv: Vec<String>,
    project_root: PathBuf,
    provider: ProviderConfig,
}

impl PromptfooEngine {
    pub fn new(cfg: &EngineConfig) -> Self {
        let mut argv = cfg.argv();
        if let Some(program) = argv.first_mut() {
            let p = PathBuf::from(program.as_str());
            if p.is_relative() && p.components().count() > 1 {
                if let Ok(abs) = std::path::absolute(&p) {
                    *program = abs.to_string_lossy().to_string();
                }
            }
        }
        Self {
            argv,
            project_root: cfg.project_root.clone(),
            provider: cfg.provider.clone(),
        }
    }

    /// The promptfoo config for one job.
    pub fn build_config(&self, job: &MatrixJob) -> Value {
        let prompts: Vec<Value> = job
            .prompts
            .iter()
            .map(|p| json!({ "label": p.label, "raw": template::normalize(&p.template) }))
            .collect();

        let providers: Vec<Value> = job
            .models
            .iter()
            .map(|m| {
                json!({
                    "id": format!("{}{}", self.provider.id_prefix, m),
                    "config": {
                        "apiBaseUrl": self.provider.api_base_url,
                        "apiKeyEnvar": self.provider.api_key_env,
                    }
                })
            })
            .collect();

        let tests: Vec<Value> = job
            .cases
            .iter()
            .map(|c| {
                let mut t = json!({
                    "vars": c.vars,
                    "metadata": { "case_id": c.correlation_id },
                });
                if !c.assertions.is_empty() {
                    t["assert"] = json!(c.assertions);
                }
                t
            })
            .collect();

        json!({
            "description": "promptgrid matrix job",
            "prompts": prompts,
            "providers": providers,
            "tests": tests,
        })
    }

    fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

#[async_trait]
impl EvalEngine for PromptfooEngine {
    fn name(&self) -> &'static str {
        "promptfoo"
    }

    fn model_prefix(&self) -> &str {
        &self.provider.id_prefix
    }

    async fn evaluate(&self, job: &MatrixJob) -> Result<Vec<EngineItem>, EngineError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(EngineError::Spawn {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty engine command"),
            });
        };

        let scratch = tempfile::Builder::new().prefix("promptgrid-").tempdir()?;
        let cfg_path = scratch.path().join(CONFIG_FILE);
        let out_path = scratch.path().join(OUTPUT_FILE);

        let yaml = serde_yaml::to_string(&self.build_config(job)).map_err(std::io::Error::other)?;
        tokio::fs::write(&cfg_path, yaml).await?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("eval")
            .arg("-c")
            .arg(&cfg_path)
            .arg("-o")
            .arg(&out_path)
            .arg("--no-cache")
            .arg("--no-progress-bar")
            // failed checks are reported per item, not through the exit code
            .env("PROMPTFOO_FAILED_TEST_EXIT_CODE", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.project_root.is_dir() {
            cmd.current_dir(&self.project_root);
        }

        tracing::debug!(
            event = "promptgrid.engine.spawn",
            command = %self.command_line(),
            config = %cfg_path.display(),
        );
        let started = Instant::now();
        let output = cmd.output().await.map_err(|e| EngineError::Spawn {
            command: self.command_line(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(EngineError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw = tokio::fs::read_to_string(&out_path).await.map_err(|e| {
            EngineError::MalformedOutput(format!("cannot read {}: {}", out_path.display(), e))
        })?;
        let items = parse_output(&raw)?;
        tracing::debug!(
            event = "promptgrid.engine.output",
            items = items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Ok(items)
    }
}

/// Flatten a promptfoo output document. Accepts both the `{results: {results: [...]}}`
/// envelope and a bare `{results: [...]}`.
pub fn parse_output(raw: &str) -> Result<Vec<EngineItem>, EngineError> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| EngineError::MalformedOutput(format!("invalid JSON: {}", e)))?;

    let results = match doc.get("results") {
        Some(Value::Array(items)) => items,
        Some(Value::Object(inner)) => match inner.get("results") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EngineError::MalformedOutput(
                    "`results.results` is not a list".into(),
                ))
            }
        },
        _ => return Err(EngineError::MalformedOutput("missing `results`".into())),
    };

    results.iter().map(parse_item).collect()
}

fn parse_item(r: &Value) -> Result<EngineItem, EngineError> {
    if !r.is_object() {
        return Err(EngineError::MalformedOutput(format!(
            "result entry is not an object: {}",
            r
        )));
    }

    let prompt = r.get("prompt");
    let response = r.get("response");
    let usage = response.and_then(|x| x.get("tokenUsage"));

    let provider_id = match r.get("provider") {
        Some(Value::String(s)) => s.clone(),
        Some(p) => str_at(p, "id").unwrap_or_default(),
        None => String::new(),
    };

    let correlation_id = r
        .pointer("/testCase/metadata/case_id")
        .or_else(|| r.pointer("/metadata/case_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let checks = r
        .pointer("/gradingResult/componentResults")
        .and_then(Value::as_array)
        .map(|cs| cs.iter().map(parse_check).collect())
        .unwrap_or_default();

    Ok(EngineItem {
        prompt_label: prompt.and_then(|p| str_at(p, "label")).unwrap_or_default(),
        rendered_prompt: prompt.and_then(|p| str_at(p, "raw")).unwrap_or_default(),
        provider_id,
        correlation_id,
        test_index: r.get("testIdx").and_then(Value::as_u64).map(|i| i as usize),
        output: response
            .and_then(|x| x.get("output"))
            .map(template::value_to_string)
            .unwrap_or_default(),
        latency_ms: r
            .get("latencyMs")
            .or_else(|| response.and_then(|x| x.get("latencyMs")))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        input_tokens: usage.and_then(|u| u.get("prompt")).and_then(Value::as_u64),
        output_tokens: usage.and_then(|u| u.get("completion")).and_then(Value::as_u64),
        success: r.get("success").and_then(Value::as_bool).unwrap_or(false),
        checks,
        error: match r.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(v) => Some(template::value_to_string(v)),
        },
    })
}

fn parse_check(c: &Value) -> CheckOutcome {
    CheckOutcome {
        kind: c
            .pointer("/assertion/type")
            .and_then(Value::as_str)
            .map(str::to_string),
        passed: c.get("pass").and_then(Value::as_bool).unwrap_or(false),
        score: c.get("score").and_then(Value::as_f64),
        reason: c.get("reason").and_then(Value::as_str).map(str::to_string),
    }
}

fn str_at(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::EngineCheck;
    use crate::engine::{CaseJob, JobPrompt};
    use crate::model::{AssertionType, Row};

    fn job() -> MatrixJob {
        let mut vars = Row::new();
        vars.insert("question".into(), json!("Capital of Korea?"));
        MatrixJob {
            prompts: vec![JobPrompt {
                label: "p_qa_v1.0.0".into(),
                template: "Answer: {question}".into(),
            }],
            models: vec!["meta-llama/Llama-3-8b-chat-hf".into()],
            cases: vec![CaseJob {
                correlation_id: "case_1".into(),
                vars,
                assertions: vec![EngineCheck {
                    kind: AssertionType::Contains,
                    value: Some("Seoul".into()),
                    threshold: None,
                }],
            }],
        }
    }

    #[test]
    fn config_carries_labels_providers_and_case_metadata() {
        let engine = PromptfooEngine::new(&EngineConfig::default());
        let cfg = engine.build_config(&job());

        assert_eq!(cfg["prompts"][0]["label"], "p_qa_v1.0.0");
        assert_eq!(cfg["prompts"][0]["raw"], "Answer: {{question}}");
        assert_eq!(
            cfg["providers"][0]["id"],
            "openai:chat:meta-llama/Llama-3-8b-chat-hf"
        );
        assert_eq!(
            cfg["providers"][0]["config"]["apiKeyEnvar"],
            "TOGETHER_API_KEY"
        );
        assert_eq!(cfg["tests"][0]["metadata"]["case_id"], "case_1");
        assert!(cfg["tests"][0]["vars"].get("case_id").is_none());
        assert_eq!(
            cfg["tests"][0]["assert"],
            json!([{"type": "contains", "value": "Seoul"}])
        );
    }

    #[test]
    fn parses_nested_results_envelope() {
        let raw = json!({
            "results": {
                "results": [{
                    "prompt": {"label": "p_qa_v1.0.0", "raw": "Answer: Capital of Korea?"},
                    "provider": {"id": "openai:chat:meta-llama/Llama-3-8b-chat-hf"},
                    "response": {
                        "output": "Seoul",
                        "latencyMs": 812,
                        "tokenUsage": {"prompt": 12, "completion": 3}
                    },
                    "success": true,
                    "testIdx": 0,
                    "testCase": {"metadata": {"case_id": "case_1"}},
                    "gradingResult": {
                        "componentResults": [
                            {"assertion": {"type": "contains", "value": "Seoul"}, "pass": true, "score": 1.0, "reason": "ok"}
                        ]
                    },
                    "vars": {"question": "Capital of Korea?"}
                }]
            }
        })
        .to_string();

        let items = parse_output(&raw).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.prompt_label, "p_qa_v1.0.0");
        assert_eq!(it.rendered_prompt, "Answer: Capital of Korea?");
        assert_eq!(it.provider_id, "openai:chat:meta-llama/Llama-3-8b-chat-hf");
        assert_eq!(it.correlation_id.as_deref(), Some("case_1"));
        assert_eq!(it.test_index, Some(0));
        assert_eq!(it.output, "Seoul");
        assert_eq!(it.latency_ms, 812.0);
        assert_eq!(it.input_tokens, Some(12));
        assert_eq!(it.output_tokens, Some(3));
        assert!(it.success);
        assert_eq!(it.checks.len(), 1);
        assert_eq!(it.checks[0].kind.as_deref(), Some("contains"));
        assert!(it.checks[0].passed);
        assert_eq!(it.error, None);
    }

    #[test]
    fn parses_flat_results_and_lenient_fields() {
        let raw = json!({
            "results": [{
                "prompt": {"label": "p"},
                "provider": "openai:chat:m",
                "response": {"output": {"answer": 42}},
                "metadata": {"case_id": "c9"},
                "success": false,
                "error": "rate limited"
            }]
        })
        .to_string();

        let items = parse_output(&raw).unwrap();
        let it = &items[0];
        assert_eq!(it.provider_id, "openai:chat:m");
        assert_eq!(it.output, r#"{"answer":42}"#);
        assert_eq!(it.correlation_id.as_deref(), Some("c9"));
        assert_eq!(it.latency_ms, 0.0);
        assert_eq!(it.input_tokens, None);
        assert!(!it.success);
        assert_eq!(it.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn rejects_documents_without_results() {
        assert!(matches!(
            parse_output("{}"),
            Err(EngineError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_output("not json"),
            Err(EngineError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_output(r#"{"results": {"stats": {}}}"#),
            Err(EngineError::MalformedOutput(_))
        ));
    }
}
