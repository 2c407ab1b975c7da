pub const SAMPLE_CONFIG: &str = r#"version: 1
db: .promptgrid/promptgrid.db
log_level: info
engine:
  # command: ["npx", "promptfoo"]
  project_root: .
  timeout_seconds: 600
  provider:
    id_prefix: "openai:chat:"
    api_base_url: https://api.together.xyz/v1
    api_key_env: TOGETHER_API_KEY
"#;

pub const SAMPLE_CATALOG: &str = r#"prompts:
  - id: rag_qa
    name: Grounded answer
    versions:
      - major: 1
        content: |
          Answer using only the context.
          Context: {{context}}
          Question: {{question}}
      - major: 1
        minor: 1
        content: |
          You are a careful assistant. Answer in one sentence using only the context.
          Context: {{context}}
          Question: {{question}}
        active: true

datasets:
  - id: geo_smoke
    name: Geography smoke set
    column_mapping:
      query: question
      doc_chunk: context
    default_assertions:
      - type: not-contains
        value: "I don't know"
    cases:
      - id: geo_1
        input:
          query: What is the capital of South Korea?
          doc_chunk: Seoul is the capital and largest city of South Korea.
        expected_output: Seoul
      - id: geo_2
        input:
          query: Which river flows through Paris?
          doc_chunk: The Seine flows through the centre of Paris.
        expected_output: Seine
        assertions:
          - type: llm-rubric
            value: Names the river without adding facts absent from the context
"#;

pub const GITIGNORE: &str = "/.promptgrid/\n*.db\n*.db-shm\n*.db-wal\n";
