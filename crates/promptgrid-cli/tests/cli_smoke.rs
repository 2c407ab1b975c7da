use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CATALOG: &str = r#"
prompts:
  - id: qa
    versions:
      - content: "Context: {context}\nQuestion: {{question}}"
datasets:
  - id: geo
    column_mapping:
      query: question
      doc: context
    cases:
      - id: geo_1
        input: { query: "Capital of Korea?", doc: "Seoul is the capital." }
      - id: geo_2
        input: { query: "River in Paris?", doc: "The Seine flows through Paris." }
  - id: empty
    cases: []
"#;

fn promptgrid(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("promptgrid").unwrap();
    cmd.current_dir(dir)
        .env_remove("PROMPTGRID_DB")
        .env_remove("PROMPTGRID_ENGINE_COMMAND")
        .env_remove("PROMPTGRID_ENGINE_TIMEOUT")
        .arg("--config")
        .arg(dir.join("promptgrid.yaml"));
    cmd
}

fn write_config(dir: &Path, command: &str) {
    fs::write(
        dir.join("promptgrid.yaml"),
        format!(
            r#"
version: 1
db: state/grid.db
engine:
  command: {}
  project_root: .
  timeout_seconds: 30
"#,
            command
        ),
    )
    .unwrap();
}

fn seeded(command: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), command);
    fs::write(dir.path().join("catalog.yaml"), CATALOG).unwrap();
    promptgrid(dir.path())
        .args(["seed", "--file", "catalog.yaml"])
        .assert()
        .success()
        .stderr(contains("seeded 1 prompts (1 versions), 2 datasets, 2 cases"));
    dir
}

fn create_run(dir: &Path) -> String {
    let out = promptgrid(dir)
        .args(["run", "create", "--prompt", "qa", "--dataset", "geo", "--model", "m1"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

#[test]
fn version_prints_package_version() {
    let dir = TempDir::new().unwrap();
    promptgrid(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn init_writes_samples_once() {
    let dir = TempDir::new().unwrap();
    promptgrid(dir.path())
        .args(["init", "--gitignore"])
        .assert()
        .success()
        .stderr(contains("created"));
    assert!(dir.path().join("promptgrid.yaml").exists());
    assert!(dir.path().join("catalog.yaml").exists());
    assert!(dir.path().join(".gitignore").exists());

    promptgrid(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(contains("already exists"));

    // The generated files are loadable as-is.
    promptgrid(dir.path())
        .args(["seed", "--file", "catalog.yaml"])
        .assert()
        .success();
    promptgrid(dir.path())
        .args(["preview", "--prompt", "rag_qa", "--dataset", "geo_smoke", "--json"])
        .assert()
        .success()
        .stdout(contains("\"prompt_version\": \"1.1.0\""))
        .stdout(contains("Seoul is the capital"));
}

#[test]
fn preview_and_suggest_report_mapping() {
    let dir = seeded(r#"["promptfoo"]"#);

    promptgrid(dir.path())
        .args(["preview", "--prompt", "qa", "--dataset", "geo", "--samples", "1", "--json"])
        .assert()
        .success()
        .stdout(contains("\"mapping_source\": \"dataset_default\""))
        .stdout(contains("Question: Capital of Korea?"));

    promptgrid(dir.path())
        .args([
            "preview", "--prompt", "qa", "--dataset", "geo", "--map", "query=question", "--json",
        ])
        .assert()
        .success()
        .stdout(contains("\"mapping_source\": \"run_override\""))
        .stdout(contains("\"is_valid\": false"));

    promptgrid(dir.path())
        .args(["suggest", "--prompt", "qa", "--dataset", "geo", "--json"])
        .assert()
        .success()
        .stdout(contains("\"mapping\""));
}

#[test]
fn create_rejects_bad_requests_with_config_exit_code() {
    let dir = seeded(r#"["promptfoo"]"#);

    promptgrid(dir.path())
        .args(["run", "create", "--prompt", "qa", "--dataset", "empty", "--model", "m1"])
        .assert()
        .code(2)
        .stderr(contains("dataset has no cases: empty"));

    promptgrid(dir.path())
        .args(["run", "create", "--prompt", "nope", "--dataset", "geo", "--model", "m1"])
        .assert()
        .code(2)
        .stderr(contains("prompt not found: nope"));

    promptgrid(dir.path())
        .args(["run", "create", "--prompt", "qa", "--dataset", "geo", "--model", "m1", "--map", "bad"])
        .assert()
        .code(2)
        .stderr(contains("expected column=variable"));

    promptgrid(dir.path())
        .args(["run", "list", "--json"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn pending_run_can_be_cancelled_once() {
    let dir = seeded(r#"["promptfoo"]"#);
    let run_id = create_run(dir.path());

    promptgrid(dir.path())
        .args(["run", "cancel", &run_id])
        .assert()
        .success()
        .stderr(contains("cancelled"));

    promptgrid(dir.path())
        .args(["run", "cancel", &run_id])
        .assert()
        .code(2)
        .stderr(contains("is already cancelled"));

    promptgrid(dir.path())
        .args(["run", "list", "--status", "cancelled", "--json"])
        .assert()
        .success()
        .stdout(contains(run_id.as_str()));
}

#[test]
fn invalid_config_version_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("promptgrid.yaml"), "version: 9\n").unwrap();
    promptgrid(dir.path())
        .args(["run", "list"])
        .assert()
        .code(2)
        .stderr(contains("version"));
}

#[cfg(unix)]
mod stub_engine {
    use super::*;

    const ARGS: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

    const SUCCESS: &str = r#"
cat > "$out" <<'JSON'
{"results": {"results": [
  {"prompt": {"label": "qa_v1.0.0", "raw": "Context: Seoul is the capital.\nQuestion: Capital of Korea?"},
   "provider": {"id": "openai:chat:m1"},
   "response": {"output": "Seoul", "latencyMs": 120},
   "success": true,
   "testCase": {"metadata": {"case_id": "geo_1"}}},
  {"prompt": {"label": "qa_v1.0.0", "raw": "Context: The Seine flows through Paris.\nQuestion: River in Paris?"},
   "provider": {"id": "openai:chat:m1"},
   "response": {"output": "The Seine", "latencyMs": 180},
   "success": true,
   "testCase": {"metadata": {"case_id": "geo_2"}}}
]}}
JSON
"#;

    fn stub(dir: &Path, body: &str) -> String {
        let path = dir.join("stub.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n{}\n", ARGS, body)).unwrap();
        format!(r#"["sh", "{}"]"#, path.display())
    }

    #[test]
    fn execute_completes_and_summarizes() {
        let scratch = TempDir::new().unwrap();
        let dir = seeded(&stub(scratch.path(), SUCCESS));
        let run_id = create_run(dir.path());

        promptgrid(dir.path())
            .args(["run", "execute", &run_id, "--json"])
            .assert()
            .success()
            .stdout(contains("\"status\": \"completed\""))
            .stdout(contains("\"passed\": 2"));

        promptgrid(dir.path())
            .args(["summary", &run_id, "--json"])
            .assert()
            .success()
            .stdout(contains("\"total_tests\": 2"))
            .stdout(contains("\"pass_rate\": 1.0"));

        promptgrid(dir.path())
            .args(["results", &run_id, "--json"])
            .assert()
            .success()
            .stdout(contains("The Seine"));

        // A completed run is not executable again.
        promptgrid(dir.path())
            .args(["run", "execute", &run_id])
            .assert()
            .code(2)
            .stderr(contains("is already completed"));
    }

    #[test]
    fn background_execute_streams_progress() {
        let scratch = TempDir::new().unwrap();
        let dir = seeded(&stub(scratch.path(), SUCCESS));
        let run_id = create_run(dir.path());

        promptgrid(dir.path())
            .args(["run", "execute", &run_id, "--background"])
            .assert()
            .success()
            .stderr(contains("[completed] 2/2 (100%)"));
    }

    #[test]
    fn engine_failure_marks_run_failed() {
        let scratch = TempDir::new().unwrap();
        let dir = seeded(&stub(scratch.path(), "echo 'provider exploded' >&2\nexit 3"));
        let run_id = create_run(dir.path());

        promptgrid(dir.path())
            .args(["run", "execute", &run_id])
            .assert()
            .code(1)
            .stderr(contains("provider exploded"));

        promptgrid(dir.path())
            .args(["run", "show", &run_id, "--json"])
            .assert()
            .success()
            .stdout(contains("\"status\": \"failed\""))
            .stdout(contains("exit 3"));
    }
}
