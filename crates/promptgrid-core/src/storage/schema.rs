pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS prompts (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prompt_versions (
  id TEXT PRIMARY KEY,
  prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
  major INTEGER NOT NULL DEFAULT 1,
  minor INTEGER NOT NULL DEFAULT 0,
  patch INTEGER NOT NULL DEFAULT 0,
  content TEXT NOT NULL,
  variables_json TEXT NOT NULL DEFAULT '[]',
  is_active INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prompt_versions_active
  ON prompt_versions(prompt_id, is_active);

CREATE TABLE IF NOT EXISTS datasets (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  column_mapping_json TEXT,
  default_assertions_json TEXT NOT NULL DEFAULT '[]',
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_cases (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
  raw_input_json TEXT NOT NULL,
  expected_output TEXT,
  assertions_json TEXT,
  is_edge_case INTEGER NOT NULL DEFAULT 0,
  is_error_pattern INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_cases_dataset ON test_cases(dataset_id);

CREATE TABLE IF NOT EXISTS test_runs (
  id TEXT PRIMARY KEY,
  name TEXT,
  prompt_ids_json TEXT NOT NULL,
  dataset_id TEXT NOT NULL REFERENCES datasets(id),
  model_ids_json TEXT NOT NULL,
  resolved_mapping_json TEXT NOT NULL,
  mapping_source TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending',
  progress INTEGER NOT NULL DEFAULT 0,
  total_cases INTEGER NOT NULL DEFAULT 0,
  completed_cases INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_test_runs_status ON test_runs(status);

CREATE TABLE IF NOT EXISTS test_results (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  run_id TEXT NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
  prompt_id TEXT NOT NULL,
  prompt_version TEXT NOT NULL,
  model_id TEXT NOT NULL,
  case_id TEXT NOT NULL REFERENCES test_cases(id),
  input_mapped_json TEXT NOT NULL,
  input_rendered TEXT NOT NULL,
  output TEXT NOT NULL,
  latency_ms REAL NOT NULL,
  input_tokens INTEGER,
  output_tokens INTEGER,
  assertion_results_json TEXT NOT NULL DEFAULT '[]',
  passed INTEGER NOT NULL,
  error TEXT,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_test_results_run ON test_results(run_id);
"#;
